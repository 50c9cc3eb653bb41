//! OS socket primitive
//!
//! Thin wrapper around one owned socket descriptor. Descriptors are always
//! placed in non-blocking mode at creation; every operation that can block
//! takes a [`Timeout`] and emulates blocking with a poll-then-retry loop.
//!
//! The invalid state ("never created" or "already closed") is represented by
//! an empty inner option, so close is idempotent and drop releases the
//! descriptor on every exit path.

use std::io;
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::time::Duration;

use socket2::{Protocol, SockAddr, Socket, Type};
use tracing::trace;

use super::addr::Family;
use super::timeout::Timeout;
use super::{Error, Result};

/// Readiness direction for [`Sock::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Read,
    Write,
}

/// One owned, always-non-blocking socket descriptor.
#[derive(Debug)]
pub struct Sock {
    inner: Option<Socket>,
}

impl Sock {
    /// A handle with no descriptor behind it.
    pub fn invalid() -> Sock {
        Sock { inner: None }
    }

    /// Create a non-blocking TCP socket in the given family. IPv6 sockets
    /// are confined to IPv6 traffic so a dual-stack OS default cannot make
    /// an `inet6` entity accept IPv4 peers.
    pub fn create(family: Family) -> Result<Sock> {
        let domain = family
            .domain()
            .ok_or(Error::InvalidState("cannot create a socket without a concrete family"))?;
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        if family == Family::Inet6 {
            socket.set_only_v6(true)?;
        }
        trace!(family = family.as_str(), fd = socket.as_raw_fd(), "socket created");
        Ok(Sock { inner: Some(socket) })
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Release the descriptor. Calling this on an already-closed handle is a
    /// no-op; the OS resource is released exactly once.
    pub fn close(&mut self) {
        if let Some(socket) = self.inner.take() {
            trace!(fd = socket.as_raw_fd(), "socket closed");
        }
    }

    /// Replace the owned descriptor with a fresh one in another family. The
    /// old descriptor is closed first; if creation then fails the handle is
    /// left invalid rather than leaking either descriptor.
    pub fn reopen(&mut self, family: Family) -> Result<()> {
        self.close();
        *self = Sock::create(family)?;
        Ok(())
    }

    fn socket(&self) -> Result<&Socket> {
        self.inner
            .as_ref()
            .ok_or(Error::InvalidState("socket is closed"))
    }

    pub(crate) fn raw(&self) -> Result<&Socket> {
        self.socket()
    }

    pub fn bind(&self, addr: &SocketAddr) -> Result<()> {
        self.socket()?.bind(&SockAddr::from(*addr))?;
        Ok(())
    }

    pub fn listen(&self, backlog: i32) -> Result<()> {
        self.socket()?.listen(backlog)?;
        Ok(())
    }

    /// Non-blocking connect. An in-flight handshake is waited out against the
    /// timeout and its outcome read back with `SO_ERROR`, so a refused or
    /// unreachable peer surfaces as that error rather than a bare
    /// would-block.
    pub fn connect(&self, addr: &SocketAddr, tm: &Timeout) -> Result<()> {
        let socket = self.socket()?;
        match socket.connect(&SockAddr::from(*addr)) {
            Ok(()) => Ok(()),
            // a retried connect on a completed handshake reports EISCONN
            Err(e) if e.raw_os_error() == Some(libc::EISCONN) => Ok(()),
            Err(e) if connect_in_progress(&e) => {
                self.wait(Wait::Write, tm)?;
                match socket.take_error()? {
                    Some(err) => Err(err.into()),
                    None => Ok(()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Accept one pending connection, waiting for readability against the
    /// timeout. The returned handle is already non-blocking.
    pub fn accept(&self, tm: &Timeout) -> Result<Sock> {
        loop {
            let socket = self.socket()?;
            match socket.accept() {
                Ok((conn, _peer)) => {
                    conn.set_nonblocking(true)?;
                    return Ok(Sock { inner: Some(conn) });
                }
                Err(e) if would_block(&e) => self.wait(Wait::Read, tm)?,
                Err(e) if interrupted(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send as much of `data` as the OS accepts, waiting for writability
    /// against the timeout. A broken pipe reports `closed`; a reset keeps its
    /// OS error so callers can tell an abort from a graceful close.
    pub fn send(&self, data: &[u8], tm: &Timeout) -> Result<usize> {
        loop {
            let socket = self.socket()?;
            match socket.send(data) {
                Ok(n) => return Ok(n),
                Err(e) if would_block(&e) => self.wait(Wait::Write, tm)?,
                Err(e) if interrupted(&e) => continue,
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Err(Error::Closed),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Receive into `buf`, waiting for readability against the timeout.
    /// An orderly shutdown by the peer reports `closed`.
    pub fn recv(&self, buf: &mut [u8], tm: &Timeout) -> Result<usize> {
        loop {
            let socket = self.socket()?;
            // socket2 takes an uninitialised buffer; a &mut [u8] is a valid
            // one since recv only writes into it
            let spare =
                unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
            match socket.recv(spare) {
                Ok(0) => return Err(Error::Closed),
                Ok(n) => return Ok(n),
                Err(e) if would_block(&e) => self.wait(Wait::Read, tm)?,
                Err(e) if interrupted(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn shutdown(&self, how: std::net::Shutdown) -> Result<()> {
        self.socket()?.shutdown(how)?;
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        addr_of(self.socket()?.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        addr_of(self.socket()?.peer_addr()?)
    }

    /// Pending `SO_ERROR`, cleared by reading it.
    pub fn take_error(&self) -> Result<Option<io::Error>> {
        Ok(self.socket()?.take_error()?)
    }

    /// Wait until the descriptor is ready in the wanted direction or the
    /// timeout tracker gives up. Block-sized quanta are retried while total
    /// budget remains; an expired budget reports `timeout`.
    pub fn wait(&self, want: Wait, tm: &Timeout) -> Result<()> {
        let fd = self.socket()?.as_raw_fd();
        let events = match want {
            Wait::Read => libc::POLLIN,
            Wait::Write => libc::POLLOUT,
        };
        loop {
            let mut pfd = libc::pollfd {
                fd,
                events,
                revents: 0,
            };
            let ms = poll_ms(tm.next_wait());
            let ret = unsafe { libc::poll(&mut pfd, 1, ms) };
            if ret < 0 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            if ret == 0 {
                if tm.wait_expired() {
                    return Err(Error::Timeout);
                }
                continue;
            }
            // readable, writable, or in an error state the next syscall
            // will report
            return Ok(());
        }
    }

    /// Raw descriptor, for callers integrating with an external select loop.
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.inner.as_ref().map(|s| s.as_raw_fd())
    }

    /// Adopt a raw descriptor, closing the previously owned one.
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open socket descriptor not owned elsewhere; the
    /// handle takes ownership and will close it.
    pub unsafe fn set_raw_fd(&mut self, fd: RawFd) {
        self.close();
        self.inner = Some(Socket::from_raw_fd(fd));
    }
}

fn addr_of(addr: SockAddr) -> Result<SocketAddr> {
    addr.as_socket()
        .ok_or(Error::InvalidState("socket has no IP address"))
}

fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(libc::EAGAIN)
}

fn interrupted(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::Interrupted
}

fn connect_in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.kind() == io::ErrorKind::Interrupted
        || e.raw_os_error() == Some(libc::EINPROGRESS)
        || e.raw_os_error() == Some(libc::EALREADY)
}

/// Poll timeout in milliseconds, rounded up so a wait never undershoots its
/// budget. `None` maps to an indefinite poll.
fn poll_ms(wait: Option<Duration>) -> libc::c_int {
    match wait {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if d.subsec_nanos() % 1_000_000 != 0 {
                ms += 1;
            }
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

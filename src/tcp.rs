//! TCP connection entity and its role state machine
//!
//! One [`TcpSocket`] moves through the master, client, and server roles in
//! place. A master becomes a server through `listen` and a client through
//! `connect`; a server's `accept` produces brand-new client entities and the
//! server itself never changes role again. Role-mismatched calls fail with an
//! invalid-state error instead of being unrepresentable, because the
//! consuming layer works with one entity type and retags it at runtime.
//!
//! Connect deserves a note: the entity is tagged `client` even when the
//! attempt fails. Non-blocking callers start a connect, get `timeout`, and
//! retry the same entity once their select loop reports writability, so the
//! tag has to move ahead of the outcome.

use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use super::addr::Family;
use super::buffer::{Buffer, Pattern, RecvError, SendError, Stats};
use super::options::{self, OptionValue};
use super::resolver::{self, Hints};
use super::sys::Sock;
use super::timeout::{Timeout, TimeoutKind};
use super::{Error, Result};

/// Listen backlog used by the boundary when the caller does not pick one.
pub const DEFAULT_BACKLOG: i32 = 32;

/// Current role of a TCP entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created but not yet committed to a role.
    Master,
    /// Connected or connecting; may send, receive, and shut down.
    Client,
    /// Listening; may only accept.
    Server,
}

/// Which direction `shutdown` half-closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSide {
    Receive,
    Send,
    Both,
}

impl FromStr for ShutdownSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<ShutdownSide> {
        match s {
            "receive" => Ok(ShutdownSide::Receive),
            "send" => Ok(ShutdownSide::Send),
            "both" => Ok(ShutdownSide::Both),
            other => Err(Error::InvalidAddress(format!(
                "unknown shutdown direction: {}",
                other
            ))),
        }
    }
}

impl From<ShutdownSide> for std::net::Shutdown {
    fn from(side: ShutdownSide) -> std::net::Shutdown {
        match side {
            ShutdownSide::Receive => std::net::Shutdown::Read,
            ShutdownSide::Send => std::net::Shutdown::Write,
            ShutdownSide::Both => std::net::Shutdown::Both,
        }
    }
}

/// One TCP connection entity: an owned descriptor, a role tag, a timeout
/// tracker, and a read buffer. Not safe for concurrent use from multiple
/// threads without external synchronization.
#[derive(Debug)]
pub struct TcpSocket {
    sock: Sock,
    family: Family,
    role: Role,
    tm: Timeout,
    buf: Buffer,
}

impl TcpSocket {
    /// Create a master entity. A concrete family allocates its non-blocking
    /// socket immediately; `Unspec` defers allocation until the first bind or
    /// connect commits to a family.
    pub fn new(family: Family) -> Result<TcpSocket> {
        let sock = match family {
            Family::Unspec => Sock::invalid(),
            _ => Sock::create(family)?,
        };
        debug!(family = family.as_str(), "master socket created");
        Ok(TcpSocket {
            sock,
            family,
            role: Role::Master,
            tm: Timeout::new(),
            buf: Buffer::new(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Family as the boundary string, `inet4` or `inet6`.
    pub fn family_name(&self) -> &'static str {
        self.family.as_str()
    }

    /// Bind to a local address. `"*"` stands for the wildcard address.
    /// Candidates are tried in resolver order; the first successful bind
    /// fixes the entity's family. On failure nothing about the entity
    /// changes.
    pub fn bind(&mut self, address: &str, port: u16) -> Result<()> {
        if self.role != Role::Master {
            return Err(Error::InvalidState("bind requires a master socket"));
        }
        let hints = Hints {
            family: self.family,
            passive: true,
        };
        let node = if address == "*" { None } else { Some(address) };
        let candidates = resolver::resolve(node, &port.to_string(), &hints)?;

        let had_socket = self.sock.is_open();
        let mut open_family = self.family;
        let mut last = Error::Resolution("no addresses to bind".to_string());
        for candidate in candidates {
            if !self.sock.is_open() || open_family != candidate.family {
                if let Err(e) = self.sock.reopen(candidate.family) {
                    last = e;
                    continue;
                }
                open_family = candidate.family;
            }
            match self.sock.bind(&candidate.addr) {
                Ok(()) => {
                    self.family = candidate.family;
                    debug!(address, port, family = self.family.as_str(), "bound");
                    return Ok(());
                }
                Err(e) => last = e,
            }
        }
        // an entity that had no socket before keeps having none
        if !had_socket {
            self.sock.close();
        }
        Err(last)
    }

    /// Move the entity into the server role. The same handle is retagged in
    /// place; no new entity is created.
    pub fn listen(&mut self, backlog: i32) -> Result<()> {
        if self.role != Role::Master {
            return Err(Error::InvalidState("listen requires a master socket"));
        }
        self.sock.listen(backlog)?;
        self.role = Role::Server;
        debug!(backlog, "listening");
        Ok(())
    }

    /// Connect to a remote address. Valid on a master or on an existing
    /// client (reconnect). Candidates are tried in resolver order with the
    /// remaining deadline; a candidate in a different family transparently
    /// replaces the owned socket. The entity is tagged `client` whether or
    /// not the attempt succeeds.
    pub fn connect(&mut self, address: &str, port: u16) -> Result<()> {
        if self.role == Role::Server {
            return Err(Error::InvalidState("connect on a listening socket"));
        }
        self.tm.mark_start();
        let hints = Hints {
            family: self.family,
            passive: false,
        };
        let result = self.try_connect(address, &port.to_string(), &hints);
        self.role = Role::Client;
        if let Err(e) = &result {
            debug!(address, port, error = %e, "connect failed");
        } else {
            debug!(address, port, family = self.family.as_str(), "connected");
        }
        result
    }

    fn try_connect(&mut self, node: &str, service: &str, hints: &Hints) -> Result<()> {
        let candidates = resolver::resolve(Some(node), service, hints)?;
        let mut open_family = self.family;
        let mut last = Error::Resolution("no addresses found".to_string());
        for candidate in candidates {
            // mixed-family resolver results are handled by swapping the
            // owned descriptor, one extra syscall instead of a hard failure
            if !self.sock.is_open() || open_family != candidate.family {
                self.sock.reopen(candidate.family)?;
                open_family = candidate.family;
            }
            match self.sock.connect(&candidate.addr, &self.tm) {
                Ok(()) => {
                    self.family = open_family;
                    return Ok(());
                }
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    /// Accept one pending connection, producing a brand-new client entity
    /// that inherits the server's family and starts with no timeout and an
    /// empty buffer. The server keeps its role and its descriptor.
    pub fn accept(&mut self) -> Result<TcpSocket> {
        if self.role != Role::Server {
            return Err(Error::InvalidState("accept requires a listening socket"));
        }
        self.tm.mark_start();
        let sock = self.sock.accept(&self.tm)?;
        debug!(family = self.family.as_str(), "accepted");
        Ok(TcpSocket {
            sock,
            family: self.family,
            role: Role::Client,
            tm: Timeout::new(),
            buf: Buffer::new(),
        })
    }

    /// Buffered send of the whole slice. On failure the error carries how
    /// many bytes were delivered before it.
    pub fn send(&mut self, data: &[u8]) -> std::result::Result<usize, SendError> {
        if self.role != Role::Client {
            return Err(SendError {
                error: Error::InvalidState("send requires a connected socket"),
                sent: 0,
            });
        }
        self.buf.send(&mut self.sock, &mut self.tm, data)
    }

    /// Buffered receive of one framed unit. On failure the error carries the
    /// bytes read before it, so a truncated line or block is not lost.
    pub fn receive(&mut self, pattern: Pattern) -> std::result::Result<Vec<u8>, RecvError> {
        if self.role != Role::Client {
            return Err(RecvError {
                error: Error::InvalidState("receive requires a connected socket"),
                partial: Vec::new(),
            });
        }
        self.buf.receive(&mut self.sock, &mut self.tm, pattern)
    }

    /// Half-close the connection. The role does not change.
    pub fn shutdown(&mut self, side: ShutdownSide) -> Result<()> {
        if self.role != Role::Client {
            return Err(Error::InvalidState("shutdown requires a connected socket"));
        }
        self.sock.shutdown(side.into())
    }

    /// Release the descriptor. Safe to call in any role and any number of
    /// times; later operations report an invalid state.
    pub fn close(&mut self) {
        self.sock.close();
    }

    /// Whether unread bytes are already buffered, in which case a caller's
    /// wait-for-readable can be skipped.
    pub fn dirty(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.sock.local_addr()
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.sock.peer_addr()
    }

    pub fn set_timeout(&mut self, kind: TimeoutKind, value: Option<Duration>) {
        self.tm.set(kind, value);
    }

    pub fn timeout(&self, kind: TimeoutKind) -> Option<Duration> {
        self.tm.get(kind)
    }

    /// I/O statistics of a client entity.
    pub fn stats(&self) -> Result<Stats> {
        if self.role != Role::Client {
            return Err(Error::InvalidState("stats require a connected socket"));
        }
        Ok(self.buf.stats())
    }

    pub fn set_stats(&mut self, received: u64, sent: u64, age: Duration) -> Result<()> {
        if self.role != Role::Client {
            return Err(Error::InvalidState("stats require a connected socket"));
        }
        self.buf.set_stats(received, sent, age);
        Ok(())
    }

    pub fn option(&self, name: &str) -> Result<OptionValue> {
        options::get(&self.sock, name)
    }

    pub fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<()> {
        options::set(&self.sock, name, value)
    }

    /// Raw descriptor for external select loops, or `None` when closed.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.sock.as_raw_fd()
    }

    /// Adopt a raw descriptor in place of the owned one.
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open socket descriptor not owned elsewhere; the
    /// entity takes ownership and will close it.
    pub unsafe fn set_raw_fd(&mut self, fd: RawFd) {
        self.sock.set_raw_fd(fd);
    }
}

/// Create, optionally bind to a local address, and connect, as one
/// operation. A failed local bind aborts before any remote attempt; a failed
/// connect releases the socket and surfaces the error.
pub fn connect_to(
    remote: &str,
    remote_port: u16,
    local: Option<(&str, u16)>,
    family: Family,
) -> Result<TcpSocket> {
    let mut tcp = TcpSocket {
        sock: Sock::invalid(),
        family,
        role: Role::Master,
        tm: Timeout::new(),
        buf: Buffer::new(),
    };
    if let Some((local_addr, local_port)) = local {
        tcp.bind(local_addr, local_port)?;
    }
    tcp.tm.mark_start();
    let hints = Hints {
        family: tcp.family,
        passive: false,
    };
    let result = tcp.try_connect(remote, &remote_port.to_string(), &hints);
    tcp.role = Role::Client;
    match result {
        Ok(()) => Ok(tcp),
        Err(e) => {
            tcp.sock.close();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_master_roles() {
        let tcp = TcpSocket::new(Family::Inet4).unwrap();
        assert_eq!(tcp.role(), Role::Master);
        assert_eq!(tcp.family_name(), "inet4");
        assert!(tcp.raw_fd().is_some());

        let tcp = TcpSocket::new(Family::Unspec).unwrap();
        assert_eq!(tcp.role(), Role::Master);
        assert!(tcp.raw_fd().is_none());
    }

    #[test]
    fn test_close_twice_is_a_noop() {
        let mut tcp = TcpSocket::new(Family::Inet4).unwrap();
        tcp.close();
        tcp.close();
        assert!(tcp.raw_fd().is_none());

        // an entity whose socket was never created closes fine too
        let mut tcp = TcpSocket::new(Family::Unspec).unwrap();
        tcp.close();
    }

    #[test]
    fn test_role_gating() {
        let mut tcp = TcpSocket::new(Family::Inet4).unwrap();
        assert!(matches!(
            tcp.send(b"x").unwrap_err().error,
            Error::InvalidState(_)
        ));
        assert!(matches!(
            tcp.receive(Pattern::Line).unwrap_err().error,
            Error::InvalidState(_)
        ));
        assert!(matches!(tcp.accept().unwrap_err(), Error::InvalidState(_)));
        assert!(matches!(
            tcp.shutdown(ShutdownSide::Both).unwrap_err(),
            Error::InvalidState(_)
        ));
        assert!(matches!(tcp.stats().unwrap_err(), Error::InvalidState(_)));
    }

    #[test]
    fn test_listen_retags_in_place() {
        let mut tcp = TcpSocket::new(Family::Inet4).unwrap();
        tcp.bind("127.0.0.1", 0).unwrap();
        let fd = tcp.raw_fd();
        tcp.listen(1).unwrap();
        assert_eq!(tcp.role(), Role::Server);
        assert_eq!(tcp.raw_fd(), fd);
        // a server cannot listen again or connect
        assert!(matches!(tcp.listen(1).unwrap_err(), Error::InvalidState(_)));
        assert!(matches!(
            tcp.connect("127.0.0.1", 1).unwrap_err(),
            Error::InvalidState(_)
        ));
    }

    #[test]
    fn test_bind_failure_changes_nothing() {
        let mut tcp = TcpSocket::new(Family::Inet4).unwrap();
        let fd = tcp.raw_fd();
        // 192.0.2.0/24 is reserved for documentation, never local
        assert!(tcp.bind("192.0.2.1", 0).is_err());
        assert_eq!(tcp.role(), Role::Master);
        assert_eq!(tcp.raw_fd(), fd);
        // still usable afterwards
        tcp.bind("127.0.0.1", 0).unwrap();
    }

    #[test]
    fn test_shutdown_side_names() {
        assert_eq!("receive".parse::<ShutdownSide>().unwrap(), ShutdownSide::Receive);
        assert_eq!("send".parse::<ShutdownSide>().unwrap(), ShutdownSide::Send);
        assert_eq!("both".parse::<ShutdownSide>().unwrap(), ShutdownSide::Both);
        assert!("up".parse::<ShutdownSide>().is_err());
    }

    #[test]
    fn test_timeout_knobs_round_trip() {
        let mut tcp = TcpSocket::new(Family::Inet4).unwrap();
        tcp.set_timeout(TimeoutKind::Total, Some(Duration::from_secs(5)));
        assert_eq!(tcp.timeout(TimeoutKind::Total), Some(Duration::from_secs(5)));
        assert_eq!(tcp.timeout(TimeoutKind::Block), None);
        tcp.set_timeout(TimeoutKind::Total, None);
        assert_eq!(tcp.timeout(TimeoutKind::Total), None);
    }
}

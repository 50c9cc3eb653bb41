//! Buffered I/O layer
//!
//! Application-level framing on top of the raw socket: delimiter-terminated
//! reads, fixed-length reads, read-to-close, and fully-retried writes, all
//! budgeted by the entity's timeout tracker.
//!
//! Partial I/O is the normal case here. Reads accumulate across however many
//! `recv` calls the pattern needs, and when the connection ends or the budget
//! runs out the bytes already read travel with the error so a truncated line
//! or block can still be salvaged.

use std::time::{Duration, Instant};

use super::sys::Sock;
use super::timeout::Timeout;
use super::{Error, Result};

const BUFFER_SIZE: usize = 8192;

/// Transport seam between the buffer layer and the raw socket, bound once at
/// entity construction. Kept as a trait so the framing logic can be exercised
/// against a scripted transport in tests.
pub trait Io {
    fn send(&mut self, data: &[u8], tm: &Timeout) -> Result<usize>;
    fn recv(&mut self, buf: &mut [u8], tm: &Timeout) -> Result<usize>;
}

impl Io for Sock {
    fn send(&mut self, data: &[u8], tm: &Timeout) -> Result<usize> {
        Sock::send(self, data, tm)
    }

    fn recv(&mut self, buf: &mut [u8], tm: &Timeout) -> Result<usize> {
        Sock::recv(self, buf, tm)
    }
}

/// What a receive call should frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Up to the next newline. The newline is consumed but not returned and
    /// carriage returns are dropped, so CRLF and LF peers read the same.
    Line,
    /// Up to the next occurrence of the delimiter, which is consumed but not
    /// returned. Bytes are kept verbatim.
    Delimited(u8),
    /// Exactly this many bytes.
    Bytes(usize),
    /// Everything until the peer closes. A close after data was read is
    /// normal completion, not an error.
    All,
}

/// Byte counters for one entity, plus the age of the counters themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub received: u64,
    pub sent: u64,
    pub age: Duration,
}

/// A receive that could not be fully satisfied. The bytes read before the
/// failure are preserved.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RecvError {
    pub error: Error,
    pub partial: Vec<u8>,
}

/// A send that could not deliver all of its data. `sent` counts the bytes
/// the OS accepted before the failure.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SendError {
    pub error: Error,
    pub sent: usize,
}

/// Read window and byte accounting over one transport.
#[derive(Debug)]
pub struct Buffer {
    storage: Box<[u8; BUFFER_SIZE]>,
    first: usize,
    last: usize,
    received: u64,
    sent: u64,
    birthday: Instant,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer {
            storage: Box::new([0; BUFFER_SIZE]),
            first: 0,
            last: 0,
            received: 0,
            sent: 0,
            birthday: Instant::now(),
        }
    }

    /// Whether unconsumed bytes remain in the window. External multiplexing
    /// callers use this to skip a wait-for-readable when data is already
    /// buffered.
    pub fn is_empty(&self) -> bool {
        self.first >= self.last
    }

    pub fn stats(&self) -> Stats {
        Stats {
            received: self.received,
            sent: self.sent,
            age: self.birthday.elapsed(),
        }
    }

    pub fn set_stats(&mut self, received: u64, sent: u64, age: Duration) {
        self.received = received;
        self.sent = sent;
        let now = Instant::now();
        self.birthday = now.checked_sub(age).unwrap_or(now);
    }

    /// Write all of `data`, retrying partial sends against the timeout.
    pub fn send<I: Io>(
        &mut self,
        io: &mut I,
        tm: &mut Timeout,
        data: &[u8],
    ) -> std::result::Result<usize, SendError> {
        tm.mark_start();
        let mut sent = 0;
        while sent < data.len() {
            match io.send(&data[sent..], tm) {
                Ok(n) => {
                    sent += n;
                    self.sent += n as u64;
                }
                Err(error) => return Err(SendError { error, sent }),
            }
        }
        Ok(sent)
    }

    /// Read one framed unit, retrying partial reads against the timeout.
    pub fn receive<I: Io>(
        &mut self,
        io: &mut I,
        tm: &mut Timeout,
        pattern: Pattern,
    ) -> std::result::Result<Vec<u8>, RecvError> {
        tm.mark_start();
        let mut out = Vec::new();
        let result = match pattern {
            Pattern::Line => self.read_delimited(io, tm, &mut out, b'\n', true),
            Pattern::Delimited(delim) => self.read_delimited(io, tm, &mut out, delim, false),
            Pattern::Bytes(count) => self.read_exact(io, tm, &mut out, count),
            Pattern::All => self.read_all(io, tm, &mut out),
        };
        match result {
            Ok(()) => Ok(out),
            Err(error) => Err(RecvError {
                error,
                partial: out,
            }),
        }
    }

    /// Refill the window from the transport when it is empty.
    fn fill<I: Io>(&mut self, io: &mut I, tm: &Timeout) -> Result<()> {
        if !self.is_empty() {
            return Ok(());
        }
        let n = io.recv(&mut self.storage[..], tm)?;
        self.received += n as u64;
        self.first = 0;
        self.last = n;
        Ok(())
    }

    fn pending(&self) -> &[u8] {
        &self.storage[self.first..self.last]
    }

    fn skip(&mut self, count: usize) {
        self.first += count;
        if self.is_empty() {
            self.first = 0;
            self.last = 0;
        }
    }

    fn read_delimited<I: Io>(
        &mut self,
        io: &mut I,
        tm: &Timeout,
        out: &mut Vec<u8>,
        delim: u8,
        strip_cr: bool,
    ) -> Result<()> {
        loop {
            self.fill(io, tm)?;
            let pending = self.pending();
            let found = pending.iter().position(|&b| b == delim);
            let take = found.unwrap_or(pending.len());
            if strip_cr {
                out.extend(pending[..take].iter().copied().filter(|&b| b != b'\r'));
            } else {
                out.extend_from_slice(&pending[..take]);
            }
            match found {
                Some(_) => {
                    self.skip(take + 1);
                    return Ok(());
                }
                None => self.skip(take),
            }
        }
    }

    fn read_exact<I: Io>(
        &mut self,
        io: &mut I,
        tm: &Timeout,
        out: &mut Vec<u8>,
        count: usize,
    ) -> Result<()> {
        while out.len() < count {
            self.fill(io, tm)?;
            let want = count - out.len();
            let pending = self.pending();
            let take = want.min(pending.len());
            out.extend_from_slice(&pending[..take]);
            self.skip(take);
        }
        Ok(())
    }

    fn read_all<I: Io>(&mut self, io: &mut I, tm: &Timeout, out: &mut Vec<u8>) -> Result<()> {
        loop {
            match self.fill(io, tm) {
                Ok(()) => {
                    let pending = self.pending();
                    out.extend_from_slice(pending);
                    let take = pending.len();
                    self.skip(take);
                }
                Err(Error::Closed) => {
                    return if out.is_empty() {
                        Err(Error::Closed)
                    } else {
                        Ok(())
                    };
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

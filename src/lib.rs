//! Non-blocking TCP socket core
//!
//! This crate provides a connection-oriented TCP socket abstraction designed
//! to be driven externally, for example from a scripting-language binding: the
//! caller polls or selects on its own schedule and invokes operations that
//! either complete, fail, or report a retryable timeout.
//!
//! Sockets are always kept in non-blocking OS mode. Blocking behavior as seen
//! by a caller is emulated by the [`Timeout`] tracker, which drives a
//! poll-then-retry loop with two independent budgets: a total deadline for the
//! whole logical operation and a per-wait block quantum.
//!
//! The central type is [`TcpSocket`], a single entity that moves between the
//! master, client, and server roles in place:
//!
//! ```no_run
//! use tcpkit::{Family, Pattern, TcpSocket};
//!
//! let mut server = TcpSocket::new(Family::Inet4)?;
//! server.bind("127.0.0.1", 0)?;
//! server.listen(tcpkit::DEFAULT_BACKLOG)?;
//! let port = server.local_addr()?.port();
//!
//! let mut client = TcpSocket::new(Family::Inet4)?;
//! client.connect("127.0.0.1", port)?;
//!
//! let mut peer = server.accept()?;
//! client.send(b"ping").map_err(|e| e.error)?;
//! let data = peer.receive(Pattern::Bytes(4)).map_err(|e| e.error)?;
//! assert_eq!(data, b"ping");
//! # Ok::<(), tcpkit::Error>(())
//! ```

pub mod addr;
pub mod buffer;
pub mod options;
pub mod resolver;
pub mod sys;
pub mod tcp;
pub mod timeout;

pub use addr::Family;
pub use buffer::{Pattern, RecvError, SendError, Stats};
pub use options::OptionValue;
pub use tcp::{connect_to, Role, ShutdownSide, TcpSocket, DEFAULT_BACKLOG};
pub use timeout::{Timeout, TimeoutKind};

/// Result type for socket operations
pub type Result<T> = std::result::Result<T, Error>;

/// Socket operation errors
///
/// The `Display` strings are the boundary surface: the consuming layer sees
/// them as plain messages rather than structured values. `timeout` and
/// `closed` are stable tokens that callers match on to drive retry loops, so
/// they must not be reworded.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The operation did not complete within its budget. Covers both a true
    /// deadline expiry and a would-block probe with a zero timeout; either
    /// way the caller may retry.
    #[error("timeout")]
    Timeout,

    /// The peer ended the connection before the operation was satisfied.
    #[error("closed")]
    Closed,

    #[error("address resolution failed: {0}")]
    Resolution(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The operation is not valid for the entity's current role, or the
    /// underlying socket has been closed.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("unknown option: {0}")]
    UnknownOption(String),

    #[error("invalid value for option {0}")]
    InvalidOptionValue(&'static str),
}

impl Error {
    /// Whether the operation may be retried after waiting for readiness.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Whether the peer closed the connection.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}

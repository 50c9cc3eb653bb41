//! Socket options by boundary name
//!
//! The consuming layer addresses options with string names, so the dispatch
//! here is a name table rather than one method per option. Readable options:
//! `keepalive`, `reuseaddr`, `tcp-nodelay`, `linger`, `error`. Writable
//! options: the first four plus `ipv6-v6only`.

use std::time::Duration;

use super::sys::Sock;
use super::{Error, Result};

/// Value carried by a named option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    /// `SO_LINGER`: `None` disables lingering, `Some(d)` blocks close for up
    /// to `d`. A zero duration makes close send a reset.
    Linger(Option<Duration>),
    /// Pending socket error, drained by reading the `error` option.
    Error(Option<String>),
}

impl OptionValue {
    fn as_bool(&self, name: &'static str) -> Result<bool> {
        match self {
            OptionValue::Bool(b) => Ok(*b),
            _ => Err(Error::InvalidOptionValue(name)),
        }
    }
}

pub(crate) fn get(sock: &Sock, name: &str) -> Result<OptionValue> {
    let socket = sock.raw()?;
    match name {
        "keepalive" => Ok(OptionValue::Bool(socket.keepalive()?)),
        "reuseaddr" => Ok(OptionValue::Bool(socket.reuse_address()?)),
        "tcp-nodelay" => Ok(OptionValue::Bool(socket.nodelay()?)),
        "linger" => Ok(OptionValue::Linger(socket.linger()?)),
        "error" => Ok(OptionValue::Error(
            sock.take_error()?.map(|e| e.to_string()),
        )),
        other => Err(Error::UnknownOption(other.to_string())),
    }
}

pub(crate) fn set(sock: &Sock, name: &str, value: &OptionValue) -> Result<()> {
    let socket = sock.raw()?;
    match name {
        "keepalive" => socket.set_keepalive(value.as_bool("keepalive")?)?,
        "reuseaddr" => socket.set_reuse_address(value.as_bool("reuseaddr")?)?,
        "tcp-nodelay" => socket.set_nodelay(value.as_bool("tcp-nodelay")?)?,
        "ipv6-v6only" => socket.set_only_v6(value.as_bool("ipv6-v6only")?)?,
        "linger" => match value {
            OptionValue::Linger(d) => socket.set_linger(*d)?,
            _ => return Err(Error::InvalidOptionValue("linger")),
        },
        other => return Err(Error::UnknownOption(other.to_string())),
    }
    Ok(())
}

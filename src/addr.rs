//! Address family handling
//!
//! This module provides the address-family tag carried by every TCP entity
//! and a few formatting helpers shared by the resolver and the state machine.

use std::net::SocketAddr;

use socket2::Domain;

use super::{Error, Result};

/// Address family of a TCP entity or a resolved candidate.
///
/// `Unspec` means the family has not been committed yet; it is resolved
/// lazily by the first successful bind or connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Inet4,
    Inet6,
    Unspec,
}

impl Family {
    /// Boundary name of the family, as surfaced to the consuming layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Inet4 => "inet4",
            Family::Inet6 => "inet6",
            Family::Unspec => "unspec",
        }
    }

    /// Parse a boundary name. Accepts the short `inet` alias for IPv4.
    pub fn from_name(name: &str) -> Result<Family> {
        match name {
            "inet" | "inet4" => Ok(Family::Inet4),
            "inet6" => Ok(Family::Inet6),
            "unspec" => Ok(Family::Unspec),
            other => Err(Error::InvalidAddress(format!(
                "unknown address family: {}",
                other
            ))),
        }
    }

    /// Family of a resolved socket address.
    pub fn of(addr: &SocketAddr) -> Family {
        match addr {
            SocketAddr::V4(_) => Family::Inet4,
            SocketAddr::V6(_) => Family::Inet6,
        }
    }

    /// Socket domain for creation. `Unspec` has no domain; socket creation
    /// must wait until a concrete candidate fixes the family.
    pub(crate) fn domain(&self) -> Option<Domain> {
        match self {
            Family::Inet4 => Some(Domain::IPV4),
            Family::Inet6 => Some(Domain::IPV6),
            Family::Unspec => None,
        }
    }

    /// Wildcard host used for passive resolution when no node is given.
    pub(crate) fn wildcard_host(&self) -> &'static str {
        match self {
            Family::Inet6 => "::",
            _ => "0.0.0.0",
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format the IP of a socket address, unwrapping IPv4-mapped IPv6 addresses
/// (`::ffff:x.x.x.x`) to their IPv4 form.
pub fn ip_string(addr: &SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => v4.ip().to_string(),
        SocketAddr::V6(v6) => {
            let ip = v6.ip();
            if let Some(mapped) = ip.to_ipv4_mapped() {
                mapped.to_string()
            } else {
                ip.to_string()
            }
        }
    }
}

//! Hostname and service resolution
//!
//! Resolution produces an ordered candidate list that bind and connect
//! consume one entry at a time until an attempt succeeds. The order is the
//! platform resolver's; no reordering or preference heuristic is applied.
//!
//! Failures surface as stable, human-readable strings because the consuming
//! layer reports them directly to its caller rather than catching structured
//! errors.

use std::net::{SocketAddr, ToSocketAddrs};

use super::addr::Family;
use super::{Error, Result};

/// Resolution constraints.
#[derive(Debug, Clone, Copy)]
pub struct Hints {
    /// Keep only candidates of this family, unless `Unspec`.
    pub family: Family,
    /// Bind-side resolution: an absent node means the wildcard address.
    pub passive: bool,
}

/// One resolved address to attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub family: Family,
    pub addr: SocketAddr,
}

/// Resolve a node and service to an ordered candidate list.
///
/// `node` of `None` yields the wildcard host for the hinted family (only
/// meaningful with `passive` hints). `service` may be a port number or a
/// service name; the platform resolver handles both.
pub fn resolve(node: Option<&str>, service: &str, hints: &Hints) -> Result<Vec<Candidate>> {
    let host = match node {
        Some(h) => h,
        None => {
            if !hints.passive {
                return Err(Error::Resolution("no host to resolve".to_string()));
            }
            hints.family.wildcard_host()
        }
    };

    // bare IPv6 literals need brackets before the service is appended
    let target = if host.contains(':') {
        format!("[{}]:{}", host, service)
    } else {
        format!("{}:{}", host, service)
    };

    let resolved = target
        .to_socket_addrs()
        .map_err(|e| Error::Resolution(format!("{}: {}", target, e)))?;

    let candidates: Vec<Candidate> = resolved
        .map(|addr| Candidate {
            family: Family::of(&addr),
            addr,
        })
        .filter(|c| hints.family == Family::Unspec || c.family == hints.family)
        .collect();

    if candidates.is_empty() {
        return Err(Error::Resolution(format!(
            "no {} addresses found for {}",
            hints.family, target
        )));
    }
    Ok(candidates)
}

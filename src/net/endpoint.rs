//! Endpoint resolution.
//!
//! # Responsibilities
//! - Resolve textual address specs into concrete socket addresses
//! - Constrain resolution to a requested address family
//! - Distinguish local (passive, possibly several results), remote
//!   (one result) and source (no port) resolution

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;

/// Address family selector for resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    #[default]
    Any,
    Ipv4,
    Ipv6,
}

impl Family {
    fn matches(&self, addr: &SocketAddr) -> bool {
        match self {
            Family::Any => true,
            Family::Ipv4 => addr.is_ipv4(),
            Family::Ipv6 => addr.is_ipv6(),
        }
    }
}

/// Error type for endpoint resolution.
///
/// A resolution failure fails the configure call that triggered it; it never
/// affects listeners that are already active.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no local port specified")]
    MissingLocalPort,
    #[error("no remote address specified")]
    MissingRemoteAddr,
    #[error("no remote port specified")]
    MissingRemotePort,
    #[error("error resolving address ({spec}): {source}")]
    Lookup {
        spec: String,
        #[source]
        source: std::io::Error,
    },
    #[error("resolution of {spec} returned no usable address")]
    Empty { spec: String },
}

/// Resolve a local listening spec to one or more concrete addresses.
///
/// An omitted address means the wildcard. For `Family::Any` the IPv6
/// unspecified address is used, which accepts IPv4 peers as well on
/// dual-stack hosts; tokio exposes no way to toggle `IPV6_V6ONLY`.
pub async fn resolve_local(
    addr: Option<&str>,
    port: u16,
    family: Family,
) -> Result<Vec<SocketAddr>, ResolveError> {
    let Some(addr) = addr else {
        let wildcard = match family {
            Family::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            _ => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        return Ok(vec![SocketAddr::new(wildcard, port)]);
    };

    let resolved = lookup(addr, port, family).await?;
    let mut out: Vec<SocketAddr> = Vec::new();
    for a in resolved {
        if !out.contains(&a) {
            out.push(a);
        }
    }
    Ok(out)
}

/// Resolve a remote endpoint, taking the first address matching the family.
pub async fn resolve_remote(
    addr: &str,
    port: u16,
    family: Family,
) -> Result<SocketAddr, ResolveError> {
    let mut resolved = lookup(addr, port, family).await?;
    Ok(resolved.remove(0))
}

/// Resolve a source address for outbound binds; the port is left ephemeral.
pub async fn resolve_source(addr: &str, family: Family) -> Result<SocketAddr, ResolveError> {
    let mut resolved = lookup(addr, 0, family).await?;
    Ok(resolved.remove(0))
}

async fn lookup(addr: &str, port: u16, family: Family) -> Result<Vec<SocketAddr>, ResolveError> {
    let spec = format!("{}:{}", addr, port);
    let resolved = lookup_host((addr, port))
        .await
        .map_err(|source| ResolveError::Lookup {
            spec: spec.clone(),
            source,
        })?;

    let matching: Vec<SocketAddr> = resolved.filter(|a| family.matches(a)).collect();
    if matching.is_empty() {
        return Err(ResolveError::Empty { spec });
    }
    Ok(matching)
}

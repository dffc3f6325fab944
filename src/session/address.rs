//! Socket address preparation.
//!
//! IPv4 only. A server may ask for the wildcard address (`""`, `"*"` or
//! `"0.0.0.0"`); a client must name a concrete host.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

use crate::fabric::Status;

/// Which side the address is prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRole {
    /// Bind address; wildcard allowed.
    Server,
    /// Connect address; wildcard refused.
    Client,
}

fn is_wildcard(host: &str) -> bool {
    matches!(host.trim(), "" | "*" | "0.0.0.0")
}

/// Resolve `host`/`port` into an IPv4 socket address for `role`.
pub fn prepare_socket_address(host: &str, port: u16, role: AddressRole) -> Result<SocketAddr, Status> {
    if is_wildcard(host) {
        return match role {
            AddressRole::Server => Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))),
            AddressRole::Client => Err(Status::InvalidAddr),
        };
    }

    let host = host.trim();
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)));
    }

    let resolved = (host, port).to_socket_addrs().map_err(|e| {
        tracing::debug!(host = %host, error = %e, "Address resolution failed");
        Status::InvalidAddr
    })?;
    resolved
        .into_iter()
        .find(SocketAddr::is_ipv4)
        .ok_or(Status::InvalidAddr)
}

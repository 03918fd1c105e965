//! Endpoint value objects (§3), grounded on zmuduo's `net/address.h`
//! (`Address` base with `IPv4Address`/`IPv6Address`/`UnixAddress`/
//! `UnknownAddress` subclasses) — expressed as a sum type rather than a
//! class hierarchy, the idiomatic Rust translation of the same contract.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};

use crate::error::{Error, Result};

/// A value-type endpoint covering IPv4, IPv6, and Unix-domain sockets, plus
/// an `Unknown` variant for address families this crate does not interpret
/// but still needs to round-trip (e.g. from `getsockname` on an exotic
/// socket). Family tag always matches the variant (§3 invariant).
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Address {
    V4(SocketAddrV4),
    V6(SocketAddrV6),
    Unix(UnixPath),
    Unknown(i32),
}

/// A Unix-domain path, including the Linux abstract-namespace form (first
/// byte `\0`), which may be shorter than `sockaddr_un`'s fixed buffer (§3:
/// "Unix may be shorter when abstract").
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct UnixPath(pub Vec<u8>);

impl fmt::Debug for UnixPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.first() == Some(&0) {
            write!(f, "@{}", String::from_utf8_lossy(&self.0[1..]))
        } else {
            write!(f, "{}", String::from_utf8_lossy(&self.0))
        }
    }
}

impl Address {
    pub fn from_socket_addr(addr: SocketAddr) -> Address {
        match addr {
            SocketAddr::V4(v4) => Address::V4(v4),
            SocketAddr::V6(v6) => Address::V6(v6),
        }
    }

    pub fn unix(path: impl Into<Vec<u8>>) -> Address {
        Address::Unix(UnixPath(path.into()))
    }

    /// Resolves `host:port` (or a literal IP) via the system resolver,
    /// returning every candidate address (§3 "Resolved by host-name lookup
    /// or constructed from literal").
    pub fn lookup(host: &str, port: u16) -> Result<Vec<Address>> {
        (host, port)
            .to_socket_addrs()
            .map(|iter| iter.map(Address::from_socket_addr).collect())
            .map_err(|source| Error::AddressResolution {
                host: host.to_string(),
                port,
                source,
            })
    }

    /// Resolves and returns the first candidate, the common case for a
    /// client dialing a single name.
    pub fn lookup_any(host: &str, port: u16) -> Result<Address> {
        Self::lookup(host, port)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::AddressResolution {
                host: host.to_string(),
                port,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses returned"),
            })
    }

    pub fn parse(literal: &str) -> Result<Address> {
        Ok(Address::from_socket_addr(literal.parse()?))
    }

    pub fn ip(ip: IpAddr, port: u16) -> Address {
        match ip {
            IpAddr::V4(v4) => Address::V4(SocketAddrV4::new(v4, port)),
            IpAddr::V6(v6) => Address::V6(SocketAddrV6::new(v6, port, 0, 0)),
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Address::V4(a) => Some(a.port()),
            Address::V6(a) => Some(a.port()),
            Address::Unix(_) | Address::Unknown(_) => None,
        }
    }

    pub fn set_port(&mut self, port: u16) {
        match self {
            Address::V4(a) => a.set_port(port),
            Address::V6(a) => a.set_port(port),
            Address::Unix(_) | Address::Unknown(_) => {}
        }
    }

    pub fn as_socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Address::V4(a) => Some(SocketAddr::V4(*a)),
            Address::V6(a) => Some(SocketAddr::V6(*a)),
            Address::Unix(_) | Address::Unknown(_) => None,
        }
    }

    pub fn family(&self) -> i32 {
        match self {
            Address::V4(_) => libc::AF_INET,
            Address::V6(_) => libc::AF_INET6,
            Address::Unix(_) => libc::AF_UNIX,
            Address::Unknown(family) => *family,
        }
    }

    /// Unspecified IPv4 wildcard on an ephemeral port, the usual starting
    /// point for `Address::ip(..., 0)`-style "bind anywhere" listeners.
    pub fn unspecified_v4(port: u16) -> Address {
        Address::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::V4(a) => write!(f, "{a}"),
            Address::V6(a) => write!(f, "{a}"),
            Address::Unix(p) => write!(f, "unix:{p:?}"),
            Address::Unknown(family) => write!(f, "unknown(family={family})"),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal_ipv4() {
        let addr = Address::parse("127.0.0.1:9000").unwrap();
        assert_eq!(addr.port(), Some(9000));
        assert_eq!(addr.family(), libc::AF_INET);
    }

    #[test]
    fn unix_path_debug_shows_abstract_prefix() {
        let mut path = vec![0u8];
        path.extend_from_slice(b"my-socket");
        let addr = Address::unix(path);
        assert_eq!(format!("{addr:?}"), "unix:@my-socket");
    }

    #[test]
    fn unspecified_v4_has_requested_port() {
        let addr = Address::unspecified_v4(8080);
        assert_eq!(addr.port(), Some(8080));
    }
}

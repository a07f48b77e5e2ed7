//! host/port resolution into an immutable [`Address`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};

/// resolved address family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    V4,
    V6,
    Unknown,
}

/// an immutable, already-resolved peer address.
///
/// constructed only through [`Address::resolve`]/[`Address::from_ip`]; on a
/// resolution failure it is the `proto = Unknown, addr = "undefined", port =
/// -1` sentinel rather than an `Err`, matching the original library's
/// `Addrinfo` default-construction-on-failure behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    addr: String,
    port: i32,
    proto: Proto,
}

impl Address {
    fn undefined() -> Self {
        Self {
            addr: "undefined".to_string(),
            port: -1,
            proto: Proto::Unknown,
        }
    }

    /// the same sentinel `resolve` falls back to, without attempting any
    /// resolution; use this to seed a not-yet-connected socket's peer field.
    pub(crate) fn unresolved() -> Self {
        Self::undefined()
    }

    /// build directly from an already-parsed IP, skipping resolution entirely
    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        let proto = match ip {
            IpAddr::V4(_) => Proto::V4,
            IpAddr::V6(_) => Proto::V6,
        };
        Self {
            addr: ip.to_string(),
            port: port as i32,
            proto,
        }
    }

    /// resolve `host` (a literal IP or a DNS name) plus `port`.
    ///
    /// never fails: on an unresolvable host this returns the `Unknown`
    /// sentinel per `spec.md` §3, it does not return a `Result`.
    pub fn resolve(host: &str, port: u16) -> Self {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Self::from_ip(IpAddr::V4(ip), port);
        }
        if let Ok(ip) = host.parse::<Ipv6Addr>() {
            return Self::from_ip(IpAddr::V6(ip), port);
        }
        match (host, port).to_socket_addrs() {
            Ok(mut addrs) => match addrs.next() {
                Some(sock_addr) => Self::from_ip(sock_addr.ip(), port),
                None => Self::undefined(),
            },
            Err(_) => Self::undefined(),
        }
    }

    /// resolve on a blocking thread pool; use from async contexts so DNS
    /// lookups for names never block the reactor thread.
    pub async fn resolve_async(host: String, port: u16) -> Self {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Self::from_ip(IpAddr::V4(ip), port);
        }
        if let Ok(ip) = host.parse::<Ipv6Addr>() {
            return Self::from_ip(IpAddr::V6(ip), port);
        }
        tokio::task::spawn_blocking(move || Self::resolve(&host, port))
            .await
            .unwrap_or_else(|_| Self::undefined())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn port(&self) -> i32 {
        self.port
    }

    pub fn proto(&self) -> Proto {
        self.proto
    }

    pub fn is_resolved(&self) -> bool {
        self.proto != Proto::Unknown
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.proto {
            Proto::V6 => write!(f, "[{}]:{}", self.addr, self.port),
            _ => write!(f, "{}:{}", self.addr, self.port),
        }
    }
}

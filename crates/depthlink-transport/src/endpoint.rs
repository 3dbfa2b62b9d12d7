use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use crate::error::{Result, TransportError};

/// Default receiver port.
pub const DEFAULT_PORT: u16 = 9999;

/// Hosts tried by a sender that was not given an explicit candidate list,
/// in priority order.
pub const DEFAULT_HOSTS: [&str; 5] = [
    "192.168.2.100",
    "192.168.1.100",
    "192.168.0.100",
    "localhost",
    "127.0.0.1",
];

/// A candidate `(host, port)` pair a sender may connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`, falling back to
    /// `default_port` when no port is given.
    ///
    /// A bare IPv6 literal without brackets is taken as a host.
    pub fn parse_with_default_port(input: &str, default_port: u16) -> Result<Self> {
        let trimmed = input.trim();
        let invalid = |reason| TransportError::InvalidEndpoint {
            input: input.to_string(),
            reason,
        };

        if trimmed.is_empty() {
            return Err(invalid("empty endpoint"));
        }

        if let Some(rest) = trimmed.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| invalid("unterminated '[' in host"))?;
            if host.is_empty() {
                return Err(invalid("empty host"));
            }
            let port = match tail {
                "" => default_port,
                tail => tail
                    .strip_prefix(':')
                    .ok_or_else(|| invalid("unexpected characters after ']'"))?
                    .parse()
                    .map_err(|_| invalid("port must be a number in 0-65535"))?,
            };
            return Ok(Self::new(host, port));
        }

        match trimmed.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                if host.is_empty() {
                    return Err(invalid("empty host"));
                }
                let port = port
                    .parse()
                    .map_err(|_| invalid("port must be a number in 0-65535"))?;
                Ok(Self::new(host, port))
            }
            _ => Ok(Self::new(trimmed, default_port)),
        }
    }

    /// Host name or address literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to every socket address the host maps to (blocking).
    pub fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                endpoint: self.to_string(),
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::NoAddress {
                endpoint: self.to_string(),
            });
        }
        Ok(addrs)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_with_default_port(s, DEFAULT_PORT)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Build a candidate list from host names sharing one port.
pub fn candidates<S: AsRef<str>>(hosts: &[S], port: u16) -> Vec<Endpoint> {
    hosts
        .iter()
        .map(|host| Endpoint::new(host.as_ref(), port))
        .collect()
}

/// The default candidate list on [`DEFAULT_PORT`].
pub fn default_candidates() -> Vec<Endpoint> {
    candidates(&DEFAULT_HOSTS, DEFAULT_PORT)
}

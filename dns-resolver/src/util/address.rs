//! Upstream nameserver addresses.
//!
//! An [`Address`] names somewhere to send a DNS query: a host, a port, and
//! a transport protocol.  They are parsed from a small URL-like syntax:
//!
//! ```text
//! <scheme>://<host>[:<port>][<path>]
//! ```
//!
//! where `scheme` is one of `udp`, `tcp`, `tcps` (TCP over TLS) or `https`
//! (DNS-over-HTTPS).  A bare IP address with no scheme is treated as
//! `udp://<ip>:53`.  IPv6 hosts are bracketed, eg `[::1]`.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// The transport used to reach an upstream nameserver.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
    Tcps,
    Https,
}

impl Protocol {
    fn default_port(self) -> u16 {
        match self {
            Protocol::Udp | Protocol::Tcp => 53,
            Protocol::Tcps => 853,
            Protocol::Https => 443,
        }
    }

    fn scheme(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
            Protocol::Tcps => "tcps",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

/// An error encountered while parsing an [`Address`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AddressError {
    /// No recognised `scheme://` prefix and the rest does not parse as a
    /// bare IP address either.
    InvalidAddress { input: String },
    /// The scheme was recognised but the port could not be parsed.
    InvalidPort { input: String },
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AddressError::InvalidAddress { input } => {
                write!(f, "'{input}' is not a valid upstream address")
            }
            AddressError::InvalidPort { input } => {
                write!(f, "'{input}' has an invalid port")
            }
        }
    }
}

impl std::error::Error for AddressError {}

/// An upstream nameserver address.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    /// The path component, for `https://` (DoH) addresses.  `None` means
    /// the default `/dns-query`.
    pub path: Option<String>,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            path: None,
        }
    }

    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, Protocol::Udp)
    }

    /// The DoH request path, defaulting to `/dns-query`.
    pub fn doh_path(&self) -> &str {
        self.path.as_deref().unwrap_or("/dns-query")
    }

    /// A key suitable for pooling/caching connections to this address:
    /// host, port, and whether the transport is stream-oriented and/or
    /// TLS-wrapped.
    pub fn pool_key(&self) -> (String, u16, bool, bool) {
        let (is_stream, is_tls) = match self.protocol {
            Protocol::Udp => (false, false),
            Protocol::Tcp => (true, false),
            Protocol::Tcps => (true, true),
            Protocol::Https => (true, true),
        };
        (self.host.clone(), self.port, is_stream, is_tls)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        write!(f, "{}://{}:{}", self.protocol, host, self.port)?;
        if let Some(path) = &self.path {
            write!(f, "{path}")?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((scheme, rest)) = s.split_once("://") {
            let protocol = match scheme {
                "udp" => Protocol::Udp,
                "tcp" => Protocol::Tcp,
                "tcps" => Protocol::Tcps,
                "https" => Protocol::Https,
                _ => return Err(AddressError::InvalidAddress { input: s.to_string() }),
            };
            parse_host_port_path(rest, protocol, s)
        } else if s.parse::<IpAddr>().is_ok() {
            Ok(Address {
                host: s.to_string(),
                port: Protocol::Udp.default_port(),
                protocol: Protocol::Udp,
                path: None,
            })
        } else {
            Err(AddressError::InvalidAddress { input: s.to_string() })
        }
    }
}

fn parse_host_port_path(rest: &str, protocol: Protocol, original: &str) -> Result<Address, AddressError> {
    let (hostport, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], Some(rest[idx..].to_string())),
        None => (rest, None),
    };

    let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| AddressError::InvalidAddress { input: original.to_string() })?;
        let port = match after.strip_prefix(':') {
            Some(p) => p
                .parse()
                .map_err(|_| AddressError::InvalidPort { input: original.to_string() })?,
            None => protocol.default_port(),
        };
        (host.to_string(), port)
    } else if let Some((host, port_str)) = hostport.rsplit_once(':') {
        // An address like `::1` without brackets has multiple colons and
        // no explicit port: treat the whole thing as the host.
        if port_str.parse::<u16>().is_ok() && !host.contains(':') {
            (host.to_string(), port_str.parse().unwrap())
        } else {
            (hostport.to_string(), protocol.default_port())
        }
    } else {
        (hostport.to_string(), protocol.default_port())
    };

    if host.is_empty() {
        return Err(AddressError::InvalidAddress { input: original.to_string() });
    }

    Ok(Address {
        host,
        port,
        protocol,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_ip_as_udp_53() {
        let addr: Address = "1.1.1.1".parse().unwrap();
        assert_eq!(addr, Address::udp("1.1.1.1", 53));
    }

    #[test]
    fn parses_udp_with_explicit_port() {
        let addr: Address = "udp://9.9.9.9:5353".parse().unwrap();
        assert_eq!(addr, Address::new("9.9.9.9", 5353, Protocol::Udp));
    }

    #[test]
    fn parses_tcps_default_port() {
        let addr: Address = "tcps://1.1.1.1".parse().unwrap();
        assert_eq!(addr, Address::new("1.1.1.1", 853, Protocol::Tcps));
    }

    #[test]
    fn parses_https_with_path() {
        let addr: Address = "https://dns.example/dns-query".parse().unwrap();
        assert_eq!(addr.protocol, Protocol::Https);
        assert_eq!(addr.port, 443);
        assert_eq!(addr.doh_path(), "/dns-query");
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let addr: Address = "tcp://[::1]:53".parse().unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, 53);
    }

    #[test]
    fn parses_bare_ipv6_as_udp() {
        let addr: Address = "::1".parse().unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, 53);
        assert_eq!(addr.protocol, Protocol::Udp);
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!("ftp://example.com".parse::<Address>().is_err());
    }

    #[test]
    fn pool_key_distinguishes_transports() {
        let udp: Address = "udp://1.1.1.1".parse().unwrap();
        let tcp: Address = "tcp://1.1.1.1".parse().unwrap();
        let tcps: Address = "tcps://1.1.1.1".parse().unwrap();
        assert_ne!(udp.pool_key(), tcp.pool_key());
        assert_ne!(tcp.pool_key(), tcps.pool_key());
    }

    #[test]
    fn display_roundtrips_scheme_and_port() {
        let addr: Address = "tcps://9.9.9.9:853".parse().unwrap();
        assert_eq!(addr.to_string(), "tcps://9.9.9.9:853");
    }
}

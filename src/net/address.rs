use crate::assets::{DEFAULT_TCP_PORT, DEFAULT_TLS_PORT};
use crate::error::{Result, SourceError};
use std::fmt;
use url::{Host, Url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Tls,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Tcp => DEFAULT_TCP_PORT,
            Scheme::Tls => DEFAULT_TLS_PORT,
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, Scheme::Tls)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Tcp => write!(f, "tcp"),
            Scheme::Tls => write!(f, "tls"),
        }
    }
}

/// Parsed remote address of a framed source: `tcp://host[:port]/path` or
/// `tls://host[:port]/path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    pub scheme: Scheme,
    /// Host without IPv6 brackets, usable for both dialing and SNI
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl SourceUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: String| SourceError::InvalidUrl {
            url: raw.to_string(),
            reason,
        };

        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;

        let scheme = match url.scheme() {
            "tcp" => Scheme::Tcp,
            "tls" => Scheme::Tls,
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(invalid("missing host".into())),
        };

        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(SourceUrl {
            scheme,
            host,
            port: url.port().unwrap_or(scheme.default_port()),
            path,
        })
    }
}

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}{}", self.scheme, self.host, self.port, self.path)
        } else {
            write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let url = SourceUrl::parse("tcp://192.168.1.20:9000/cam/main").unwrap();
        assert_eq!(url.scheme, Scheme::Tcp);
        assert_eq!(url.host, "192.168.1.20");
        assert_eq!(url.port, 9000);
        assert_eq!(url.path, "/cam/main");
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(SourceUrl::parse("tcp://cam.local/live").unwrap().port, DEFAULT_TCP_PORT);
        assert_eq!(SourceUrl::parse("tls://cam.local/live").unwrap().port, DEFAULT_TLS_PORT);
    }

    #[test]
    fn test_ipv6_host_has_no_brackets() {
        let url = SourceUrl::parse("tls://[::1]:8555/live?token=abc").unwrap();
        assert_eq!(url.host, "::1");
        assert_eq!(url.path, "/live?token=abc");
        assert_eq!(url.to_string(), "tls://[::1]:8555/live?token=abc");
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(
            SourceUrl::parse("rtsp://cam.local/live"),
            Err(SourceError::InvalidUrl { .. })
        ));
        assert!(matches!(
            SourceUrl::parse("not a url"),
            Err(SourceError::InvalidUrl { .. })
        ));
    }
}

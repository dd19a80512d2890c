use crate::assets::{READ_BUFFER_COUNT, READ_BUFFER_SIZE, READ_TIMEOUT, RETRY_PAUSE, WRITE_TIMEOUT};
use crate::net::tls::normalize_fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which transport the client should use to carry the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// Let the transport pick.
    #[default]
    Automatic,
    Tcp,
    Udp,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Automatic => write!(f, "automatic"),
            TransportProtocol::Tcp => write!(f, "tcp"),
            TransportProtocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for TransportProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "automatic" | "auto" => Ok(TransportProtocol::Automatic),
            "tcp" => Ok(TransportProtocol::Tcp),
            "udp" => Ok(TransportProtocol::Udp),
            other => Err(format!("unknown transport protocol '{}'", other)),
        }
    }
}

/// Configuration of one external source.
///
/// Built once with [`SourceConfig::new`] and the `with_*` methods, then handed
/// to the connector which never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    url: String,
    protocol: TransportProtocol,
    any_port_enable: bool,
    fingerprint: Option<String>,
    read_timeout: Duration,
    write_timeout: Duration,
    read_buffer_count: usize,
    read_buffer_size: usize,
    retry_pause: Duration,
}

impl SourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        SourceConfig {
            url: url.into(),
            protocol: TransportProtocol::Automatic,
            any_port_enable: false,
            fingerprint: None,
            read_timeout: READ_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            read_buffer_count: READ_BUFFER_COUNT,
            read_buffer_size: READ_BUFFER_SIZE,
            retry_pause: RETRY_PAUSE,
        }
    }

    pub fn with_protocol(mut self, protocol: TransportProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_any_port_enable(mut self, enable: bool) -> Self {
        self.any_port_enable = enable;
        self
    }

    /// Pin the server certificate. Empty strings disable pinning.
    pub fn with_fingerprint(mut self, fingerprint: impl AsRef<str>) -> Self {
        let normalized = normalize_fingerprint(fingerprint.as_ref());
        self.fingerprint = if normalized.is_empty() { None } else { Some(normalized) };
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_read_buffer_count(mut self, count: usize) -> Self {
        self.read_buffer_count = count.max(1);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    pub fn any_port_enable(&self) -> bool {
        self.any_port_enable
    }

    /// Lowercase hex digest, separators stripped.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub fn read_buffer_count(&self) -> usize {
        self.read_buffer_count
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn retry_pause(&self) -> Duration {
        self.retry_pause
    }
}

//! Error taxonomy for connect and read failures.

use std::time::Duration;

pub type Result<T, E = SourceError> = std::result::Result<T, E>;

/// Reasons a connection attempt or a read loop can end.
///
/// Everything except [`SourceError::Cancelled`] is treated by the connector
/// as a transient failure and retried after the cooldown.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid source url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("transport protocol {0} is not supported by this transport")]
    UnsupportedProtocol(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("tls error: {0}")]
    Tls(String),

    #[error("server fingerprint do not match: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session closed")]
    Closed,

    #[error("operation cancelled")]
    Cancelled,
}

impl SourceError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SourceError::Cancelled)
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Protocol(format!("malformed session description: {}", e))
    }
}

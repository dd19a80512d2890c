//! Transport seam between the connector and the session library.
//!
//! The connector only ever talks to a [`Transport`] (dial) and to the
//! [`Session`] it returns (read, close). [`framed::FramedTransport`] is the
//! bundled implementation.

pub mod address;
pub mod framed;
pub mod tls;

use crate::config::{SourceConfig, TransportProtocol};
use crate::error::{Result, SourceError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Application,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
            MediaKind::Application => write!(f, "Application"),
        }
    }
}

/// Media description of one negotiated track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub kind: MediaKind,
    /// Encoding name, e.g. `H264` or `opus`
    pub codec: String,
    pub clock_rate: u32,
}

/// Channel a payload travelled on within its track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Rtp,
    Rtcp,
}

impl StreamType {
    pub fn as_u8(self) -> u8 {
        match self {
            StreamType::Rtp => 0,
            StreamType::Rtcp => 1,
        }
    }
}

impl TryFrom<u8> for StreamType {
    type Error = SourceError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(StreamType::Rtp),
            1 => Ok(StreamType::Rtcp),
            other => Err(SourceError::Protocol(format!("unknown stream type {}", other))),
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::Rtp => write!(f, "RTP"),
            StreamType::Rtcp => write!(f, "RTCP"),
        }
    }
}

/// One payload delivered by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub track_id: usize,
    pub stream_type: StreamType,
    pub payload: Bytes,
}

/// How the server certificate is trusted on secured transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Standard chain validation against the platform roots
    System,
    /// Only the certificate whose SHA-256 digest equals this hex string
    Pinned(String),
}

/// Everything a transport needs to dial one session.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: String,
    pub protocol: TransportProtocol,
    pub any_port_enable: bool,
    pub trust: TrustPolicy,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub read_buffer_count: usize,
    pub read_buffer_size: usize,
}

impl ConnectRequest {
    pub fn from_config(config: &SourceConfig) -> Self {
        ConnectRequest {
            url: config.url().to_string(),
            protocol: config.protocol(),
            any_port_enable: config.any_port_enable(),
            trust: match config.fingerprint() {
                Some(fingerprint) => TrustPolicy::Pinned(fingerprint.to_string()),
                None => TrustPolicy::System,
            },
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            read_buffer_count: config.read_buffer_count(),
            read_buffer_size: config.read_buffer_size(),
        }
    }
}

/// Dials sessions.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish one session.
    ///
    /// Must return [`SourceError::Cancelled`] promptly once `cancel` fires.
    async fn connect(
        &self,
        request: ConnectRequest,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn Session>>;
}

/// A live connection with negotiated tracks.
#[async_trait]
pub trait Session: Send + Sync {
    fn tracks(&self) -> &[TrackDescriptor];

    /// Deliver frames in arrival order until the session fails or is closed.
    async fn read_frames(&self, on_frame: &mut (dyn FnMut(Frame) + Send)) -> Result<()>;

    /// Tear the session down. A pending [`Session::read_frames`] returns an error.
    fn close(&self);
}

//! Length-delimited stream transport over TCP or TLS.
//!
//! Wire format, every message prefixed by a 4 byte big-endian length:
//! - client → server: JSON [`Hello`]
//! - server → client: JSON [`SessionDescription`]
//! - server → client, repeated: `[track: u8][stream type: u8][payload]`

use crate::assets::{MAX_HANDSHAKE_SIZE, USER_AGENT};
use crate::config::TransportProtocol;
use crate::error::{Result, SourceError};
use crate::net::address::SourceUrl;
use crate::net::tls::client_config;
use crate::net::{ConnectRequest, Frame, Session, StreamType, TrackDescriptor, Transport};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

/// Opening request of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub path: String,
    pub user_agent: String,
}

/// Server answer listing the tracks it is going to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub tracks: Vec<TrackDescriptor>,
}

trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

type FramedIo = Framed<Box<dyn AsyncStream>, LengthDelimitedCodec>;

/// Encode one frame into its wire message (without the length prefix).
pub fn encode_frame(frame: &Frame) -> Result<Bytes> {
    let track = u8::try_from(frame.track_id)
        .map_err(|_| SourceError::Protocol(format!("track index {} out of range", frame.track_id)))?;

    let mut buf = BytesMut::with_capacity(frame.payload.len() + 2);
    buf.put_u8(track);
    buf.put_u8(frame.stream_type.as_u8());
    buf.put_slice(&frame.payload);
    Ok(buf.freeze())
}

/// Decode one wire message, validating the track index against `track_count`.
pub fn decode_frame(message: Bytes, track_count: usize) -> Result<Frame> {
    if message.len() < 2 {
        return Err(SourceError::Protocol(format!("frame too short ({} bytes)", message.len())));
    }

    let track_id = message[0] as usize;
    if track_id >= track_count {
        return Err(SourceError::Protocol(format!(
            "frame for unknown track {} ({} tracks)",
            track_id, track_count
        )));
    }

    Ok(Frame {
        track_id,
        stream_type: StreamType::try_from(message[1])?,
        payload: message.slice(2..),
    })
}

async fn with_timeout<T, F>(operation: &'static str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| SourceError::Timeout { operation, timeout })?
}

#[derive(Debug, Default, Clone)]
pub struct FramedTransport;

impl FramedTransport {
    pub fn new() -> Self {
        FramedTransport
    }

    async fn dial(&self, request: ConnectRequest) -> Result<Arc<dyn Session>> {
        match request.protocol {
            TransportProtocol::Automatic | TransportProtocol::Tcp => {}
            TransportProtocol::Udp => {
                return Err(SourceError::UnsupportedProtocol(request.protocol.to_string()));
            }
        }
        if request.any_port_enable {
            log::debug!("any-port mode only applies to UDP, ignored");
        }

        let url = SourceUrl::parse(&request.url)?;

        let tcp = with_timeout("dial", request.read_timeout, async {
            Ok::<_, SourceError>(TcpStream::connect((url.host.as_str(), url.port)).await?)
        })
        .await?;
        tcp.set_nodelay(true)?;

        let io: Box<dyn AsyncStream> = if url.scheme.is_secure() {
            let tls = client_config(&request.trust)?;
            let server_name = ServerName::try_from(url.host.clone())
                .map_err(|e| SourceError::Tls(format!("invalid server name '{}': {}", url.host, e)))?;

            let handshake = TlsConnector::from(tls.config).connect(server_name, tcp);
            match tokio::time::timeout(request.read_timeout, handshake).await {
                Ok(Ok(stream)) => Box::new(stream),
                Ok(Err(e)) => {
                    return Err(tls
                        .verifier
                        .and_then(|v| v.take_mismatch())
                        .unwrap_or_else(|| SourceError::Tls(e.to_string())));
                }
                Err(_) => {
                    return Err(SourceError::Timeout {
                        operation: "tls handshake",
                        timeout: request.read_timeout,
                    });
                }
            }
        } else {
            Box::new(tcp)
        };

        // the description may outgrow a media frame, the frame cap applies after it
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_HANDSHAKE_SIZE.max(request.read_buffer_size))
            .new_codec();
        let capacity = request.read_buffer_count.saturating_mul(request.read_buffer_size);
        let mut framed = Framed::with_capacity(io, codec, capacity);

        let hello = Hello {
            path: url.path.clone(),
            user_agent: USER_AGENT.to_string(),
        };
        log::debug!("c->s {:?}", hello);
        let payload = Bytes::from(serde_json::to_vec(&hello)?);
        with_timeout("write", request.write_timeout, async {
            Ok::<_, SourceError>(framed.send(payload).await?)
        })
        .await?;

        let answer = with_timeout("read", request.read_timeout, async {
            let message: Result<_> = match framed.next().await {
                Some(message) => message.map_err(SourceError::from),
                None => Err(SourceError::Protocol("connection closed during handshake".into())),
            };
            message
        })
        .await?;
        let description: SessionDescription = serde_json::from_slice(&answer)?;
        log::debug!("s->c {:?}", description);
        framed.codec_mut().set_max_frame_length(request.read_buffer_size);

        if description.tracks.is_empty() {
            return Err(SourceError::Protocol("server announced no tracks".into()));
        }
        if description.tracks.len() > usize::from(u8::MAX) + 1 {
            return Err(SourceError::Protocol(format!(
                "server announced {} tracks",
                description.tracks.len()
            )));
        }

        Ok(Arc::new(FramedSession {
            tracks: description.tracks,
            io: Mutex::new(framed),
            read_timeout: request.read_timeout,
            closed: CancellationToken::new(),
        }))
    }
}

#[async_trait]
impl Transport for FramedTransport {
    async fn connect(
        &self,
        request: ConnectRequest,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn Session>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SourceError::Cancelled),
            res = self.dial(request) => res,
        }
    }
}

pub struct FramedSession {
    tracks: Vec<TrackDescriptor>,
    io: Mutex<FramedIo>,
    read_timeout: Duration,
    closed: CancellationToken,
}

#[async_trait]
impl Session for FramedSession {
    fn tracks(&self) -> &[TrackDescriptor] {
        &self.tracks
    }

    async fn read_frames(&self, on_frame: &mut (dyn FnMut(Frame) + Send)) -> Result<()> {
        let mut framed = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(SourceError::Closed),
            framed = self.io.lock() => framed,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(SourceError::Closed),
                next = tokio::time::timeout(self.read_timeout, framed.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    return Err(SourceError::Timeout {
                        operation: "read",
                        timeout: self.read_timeout,
                    });
                }
                Ok(None) => {
                    return Err(SourceError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream ended by remote",
                    )));
                }
                Ok(Some(message)) => message?,
            };

            on_frame(decode_frame(message.freeze(), self.tracks.len())?);
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

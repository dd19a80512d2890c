pub mod assets;
pub mod config;
pub mod error;
pub mod net;
pub mod source;

pub use config::{SourceConfig, TransportProtocol};
pub use error::{Result, SourceError};
pub use net::framed::FramedTransport;
pub use net::{Frame, MediaKind, Session, StreamType, TrackDescriptor, Transport};
pub use source::{ExternalSource, SourceParent, SourceState, SourceStats};

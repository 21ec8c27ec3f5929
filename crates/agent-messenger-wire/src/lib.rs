//! Wire layer for agent-messenger — frame codec and transport adapters.
//!
//! Frames are length-prefixed on the wire: a fixed 13-byte header carrying
//! `{ length: u32, sequence: u64, kind: u8 }` (big-endian) followed by
//! `length` bytes of JSON body. The codec is incremental and tolerates
//! arbitrary chunk splits; the transport layer abstracts over TCP and an
//! in-process pipe so the core behaves identically against either.

pub mod control;
pub mod frame;
pub mod transport;

use agent_messenger_types::ErrorClass;
use thiserror::Error;

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Errors from the wire layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("Unknown frame kind: {0}")]
    UnknownFrameKind(u8),
    #[error("Invalid frame payload: {0}")]
    InvalidPayload(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Handshake timed out")]
    HandshakeTimeout,
    #[error("Protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },
}

impl WireError {
    /// Classify this error per the messenger's error taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            WireError::Io(_) | WireError::ConnectionClosed => ErrorClass::Transient,
            WireError::Json(_)
            | WireError::FrameTooLarge { .. }
            | WireError::UnknownFrameKind(_)
            | WireError::InvalidPayload(_)
            | WireError::HandshakeFailed(_)
            | WireError::HandshakeTimeout
            | WireError::VersionMismatch { .. } => ErrorClass::Protocol,
        }
    }
}

pub use control::ControlFrame;
pub use frame::{FrameDecoder, HEADER_LEN};
pub use transport::{BoxedConn, MemoryConnector, MemoryTransport, TcpTransport, Transport};

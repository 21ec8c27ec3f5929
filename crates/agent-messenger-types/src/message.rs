//! The message data model.
//!
//! A [`Message`] is one decoded frame: a link-level sequence number, the
//! originating peer, a destination, a kind discriminant, and an opaque
//! payload. Messages are immutable once decoded.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Generate a fresh random peer ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The underlying string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines and prompts (first 8 chars).
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a message is headed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "to", content = "peer")]
pub enum Destination {
    /// Hand off to the receiving node's local consumer.
    #[serde(rename = "local")]
    Local,
    /// Fan out to every connected peer except the sender.
    #[serde(rename = "broadcast")]
    Broadcast,
    /// Forward to one specific connected peer.
    #[serde(rename = "peer")]
    Peer(PeerId),
}

/// Frame kind discriminant. Matches the wire kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Application payload, routed by destination.
    Data,
    /// Session/connection control, never surfaced to consumers.
    Control,
}

impl MessageKind {
    /// Wire kind byte for this variant.
    pub fn as_byte(self) -> u8 {
        match self {
            MessageKind::Data => 0,
            MessageKind::Control => 1,
        }
    }

    /// Parse a wire kind byte. Unknown bytes are malformed frames.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(MessageKind::Data),
            1 => Some(MessageKind::Control),
            _ => None,
        }
    }
}

/// A decoded frame.
///
/// `sequence` is link-level: each session stamps its outbound frames from a
/// strictly increasing per-session counter starting at 1. `sender` is
/// preserved end-to-end when messages are forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Link-level sequence number, unique and strictly increasing per session.
    pub sequence: u64,
    /// Originating peer.
    pub sender: PeerId,
    /// Routing destination.
    pub destination: Destination,
    /// Data or Control.
    pub kind: MessageKind,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// Build an unstamped (sequence 0) data message. The session writer
    /// assigns the real sequence when the frame goes out.
    pub fn data(sender: PeerId, destination: Destination, payload: Vec<u8>) -> Self {
        Self {
            sequence: 0,
            sender,
            destination,
            kind: MessageKind::Data,
            payload,
        }
    }

    /// Build an unstamped control message.
    pub fn control(sender: PeerId, payload: Vec<u8>) -> Self {
        Self {
            sequence: 0,
            sender,
            destination: Destination::Local,
            kind: MessageKind::Control,
            payload,
        }
    }

    /// Payload as UTF-8 text, lossy.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_generate_unique() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_peer_id_short() {
        let id = PeerId::from("abcdef012345");
        assert_eq!(id.short(), "abcdef01");
        let tiny = PeerId::from("abc");
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn test_kind_byte_roundtrip() {
        assert_eq!(MessageKind::from_byte(0), Some(MessageKind::Data));
        assert_eq!(MessageKind::from_byte(1), Some(MessageKind::Control));
        assert_eq!(MessageKind::from_byte(7), None);
        assert_eq!(MessageKind::Data.as_byte(), 0);
        assert_eq!(MessageKind::Control.as_byte(), 1);
    }

    #[test]
    fn test_destination_serde() {
        let dest = Destination::Peer(PeerId::from("alice"));
        let json = serde_json::to_string(&dest).unwrap();
        assert!(json.contains("peer"));
        assert!(json.contains("alice"));
        let back: Destination = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dest);

        let local: Destination = serde_json::from_str(r#"{"to":"local"}"#).unwrap();
        assert_eq!(local, Destination::Local);
    }

    #[test]
    fn test_data_message_unstamped() {
        let msg = Message::data(PeerId::from("alice"), Destination::Broadcast, b"hi".to_vec());
        assert_eq!(msg.sequence, 0);
        assert_eq!(msg.kind, MessageKind::Data);
        assert_eq!(msg.payload_text(), "hi");
    }
}

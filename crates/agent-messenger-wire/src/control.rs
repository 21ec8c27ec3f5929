//! Control frame payloads.
//!
//! Control frames carry session-level signalling as JSON in the frame body
//! payload. They are handled entirely inside the listener core and never
//! surfaced to local consumers.

use crate::WireError;
use agent_messenger_types::{Message, PeerId};
use serde::{Deserialize, Serialize};

/// Session control operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ControlFrame {
    /// First frame on any connection: identify the dialing peer.
    #[serde(rename = "hello")]
    Hello {
        /// The dialer's peer ID.
        peer_id: PeerId,
        /// Wire protocol version.
        protocol_version: u32,
    },
    /// Listener's handshake reply. Advertises the currently connected peers
    /// so a dialer can discover the roster without a separate request.
    #[serde(rename = "hello_ack")]
    HelloAck {
        /// The listener's peer ID.
        peer_id: PeerId,
        /// Wire protocol version.
        protocol_version: u32,
        /// Peers currently connected to the listener.
        peers: Vec<PeerId>,
    },
    /// Periodic liveness signal; refreshes the session's last-seen time.
    #[serde(rename = "heartbeat")]
    Heartbeat,
    /// Graceful close request; the receiver drains the session.
    #[serde(rename = "disconnect")]
    Disconnect,
}

impl ControlFrame {
    /// Wrap this control operation in an unstamped control [`Message`].
    pub fn into_message(self, sender: PeerId) -> Result<Message, WireError> {
        let payload = serde_json::to_vec(&self)?;
        Ok(Message::control(sender, payload))
    }

    /// Parse a control frame from a control message's payload.
    pub fn from_message(msg: &Message) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(&msg.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_roundtrip() {
        let hello = ControlFrame::Hello {
            peer_id: PeerId::from("alice"),
            protocol_version: 1,
        };
        let msg = hello.clone().into_message(PeerId::from("alice")).unwrap();
        assert_eq!(ControlFrame::from_message(&msg).unwrap(), hello);
    }

    #[test]
    fn test_hello_ack_carries_roster() {
        let ack = ControlFrame::HelloAck {
            peer_id: PeerId::from("node"),
            protocol_version: 1,
            peers: vec![PeerId::from("alice"), PeerId::from("bob")],
        };
        let json = serde_json::to_string(&ack).unwrap();
        assert!(json.contains("hello_ack"));
        assert!(json.contains("alice"));
        let back: ControlFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ack);
    }

    #[test]
    fn test_heartbeat_tag() {
        let json = serde_json::to_string(&ControlFrame::Heartbeat).unwrap();
        assert_eq!(json, r#"{"op":"heartbeat"}"#);
    }

    #[test]
    fn test_unknown_op_rejected() {
        let msg = Message::control(PeerId::from("x"), br#"{"op":"warp"}"#.to_vec());
        assert!(ControlFrame::from_message(&msg).is_err());
    }
}

//! Node-level errors.

use agent_messenger_types::{ErrorClass, PeerId};
use agent_messenger_wire::WireError;
use thiserror::Error;

/// Errors from the listener core.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Startup bind failure. Aborts the process with a non-zero exit code.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Wire(#[from] WireError),

    /// A session's bounded queue refused a push.
    #[error("Queue full for peer {0}")]
    QueueFull(PeerId),

    /// The destination peer has no live session.
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(PeerId),

    /// A message store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// The node is shutting down.
    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl NodeError {
    /// Classify this error per the messenger's error taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            NodeError::Bind { .. } => ErrorClass::Fatal,
            NodeError::Wire(e) => e.class(),
            NodeError::QueueFull(_) => ErrorClass::Resource,
            NodeError::PeerUnreachable(_) => ErrorClass::Transient,
            NodeError::Store(_) => ErrorClass::Resource,
            NodeError::ShuttingDown => ErrorClass::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_is_fatal() {
        let err = NodeError::Bind {
            addr: "127.0.0.1:1".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_wire_class_passthrough() {
        let err = NodeError::Wire(WireError::UnknownFrameKind(9));
        assert_eq!(err.class(), ErrorClass::Protocol);
        let err = NodeError::Wire(WireError::ConnectionClosed);
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn test_queue_full_is_resource() {
        let err = NodeError::QueueFull(PeerId::from("p"));
        assert_eq!(err.class(), ErrorClass::Resource);
    }
}

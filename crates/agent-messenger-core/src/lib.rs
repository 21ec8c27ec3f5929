//! Listener core for agent-messenger.
//!
//! Composition root for the message pipeline: a [`Node`] accepts peer
//! connections, supervises one session per connection (handshake → decode →
//! sequence-track → inbox → dispatch), and routes decoded messages to a
//! local consumer, to other peers, or to an optional store.
//!
//! ## Architecture
//!
//! - **Node**: owns the accept loop and the lifecycle of every session
//! - **Session**: per-connection pipeline with its own decode buffer,
//!   bounded inbox, and outbound writer
//! - **Router**: dispatches decoded messages by destination
//! - **RouteTable**: peer-id → live session lookup, single-writer
//! - **Client**: dialer used by the CLI and by peers sending outward

pub mod client;
pub mod error;
pub mod inbox;
pub mod node;
pub mod router;
pub mod routes;
mod session;

pub use client::Client;
pub use error::NodeError;
pub use inbox::{Inbound, Inbox, InboxReceiver, PushError, SeqCheck, SequenceTracker};
pub use node::{MetricsSnapshot, Node, NodeMetrics, NodeStatus, PeerStatus};
pub use router::{
    DispatchOutcome, DropReason, LocalConsumer, MemoryStore, MessageStore, Router,
};
pub use routes::{RouteEntry, RouteTable, SessionState};

//! Core types for the agent-messenger listener/router.
//!
//! This crate defines the shared data model used across the wire protocol,
//! the listener core, and the CLI. It contains no business logic.

pub mod config;
pub mod error;
pub mod message;

pub use config::MessengerConfig;
pub use error::ErrorClass;
pub use message::{Destination, Message, MessageKind, PeerId};

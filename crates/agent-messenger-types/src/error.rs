//! Error classification shared across the messenger.
//!
//! Every error in the system maps to one of four classes, which decide the
//! blast radius: retried locally, fatal to one session, surfaced to the
//! operator, or fatal to the process.

use serde::{Deserialize, Serialize};

/// How severe an error is, and what it may take down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Retried or backed off locally (I/O timeout, momentary backpressure).
    Transient,
    /// Fatal to the owning session only (malformed frame, bad handshake).
    Protocol,
    /// Session-scoped refusal surfaced to the operator (queue exhausted,
    /// connection limit).
    Resource,
    /// Aborts the process with a non-zero exit code (bind failure).
    Fatal,
}

impl ErrorClass {
    /// Whether this class is allowed to terminate the process.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorClass::Fatal)
    }

    /// Whether this class ends the owning session.
    pub fn ends_session(self) -> bool {
        matches!(self, ErrorClass::Protocol | ErrorClass::Fatal)
    }
}

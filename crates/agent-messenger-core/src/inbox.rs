//! Per-session inbox queue and sequence tracking.
//!
//! Each session owns one bounded inbox holding decoded messages awaiting
//! dispatch. A full inbox applies backpressure to the session's read loop
//! (via [`Inbox::push_wait`]); messages are never dropped silently and the
//! queue never grows past its capacity.

use agent_messenger_types::Message;
use tokio::sync::mpsc;
use tracing::warn;

/// A decoded message annotated with sequence-gap information.
#[derive(Debug, Clone)]
pub struct Inbound {
    /// The decoded message.
    pub message: Message,
    /// True when one or more sequence numbers were skipped before this
    /// message. Gapped messages are still delivered; the flag is surfaced
    /// to the operator-visible metrics.
    pub gap: bool,
}

/// Why a push was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The queue is at capacity. The producer must pause.
    QueueFull,
    /// The session closed and the receiver is gone.
    Closed,
}

/// Producer half of a session's inbox.
#[derive(Debug, Clone)]
pub struct Inbox {
    tx: mpsc::Sender<Inbound>,
}

/// Consumer half of a session's inbox.
#[derive(Debug)]
pub struct InboxReceiver {
    rx: mpsc::Receiver<Inbound>,
}

/// Create a bounded inbox pair.
pub fn inbox(capacity: usize) -> (Inbox, InboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (Inbox { tx }, InboxReceiver { rx })
}

impl Inbox {
    /// Non-blocking push. Rejects with [`PushError::QueueFull`] when the
    /// queue is at capacity.
    pub fn push(&self, inbound: Inbound) -> Result<(), PushError> {
        self.tx.try_send(inbound).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Awaiting push. Suspends the caller (the session's read loop) until
    /// space frees — this is the backpressure point.
    pub async fn push_wait(&self, inbound: Inbound) -> Result<(), PushError> {
        self.tx.send(inbound).await.map_err(|_| PushError::Closed)
    }
}

impl InboxReceiver {
    /// Pop the next message, suspending until one is available. Returns
    /// `None` once the session closes and the queue is drained.
    pub async fn pop(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    /// Close the receiving side, refusing further pushes.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// What a sequence observation means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    /// New message; `gap` is true when sequence numbers were skipped.
    Fresh { gap: bool },
    /// Already delivered (at-least-once transport re-sent it). Drop it.
    Duplicate,
}

/// Tracks per-session inbound sequence numbers for dedup-on-receive and
/// gap detection. `last_delivered` is the highest sequence handed onward.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last_delivered: u64,
}

impl SequenceTracker {
    /// Create a tracker expecting sequences to start at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe an inbound sequence number.
    pub fn observe(&mut self, sequence: u64) -> SeqCheck {
        if sequence <= self.last_delivered {
            warn!(
                sequence,
                last_delivered = self.last_delivered,
                "duplicate frame dropped"
            );
            return SeqCheck::Duplicate;
        }
        let gap = sequence > self.last_delivered + 1;
        self.last_delivered = sequence;
        SeqCheck::Fresh { gap }
    }

    /// Highest sequence delivered so far.
    pub fn last_delivered(&self) -> u64 {
        self.last_delivered
    }
}

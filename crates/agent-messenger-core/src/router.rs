//! Router — dispatches decoded messages by destination.
//!
//! `Local` messages go to the registered consumer, `Broadcast` fans out to
//! every connected peer except the sender, and `Peer` messages are enqueued
//! on that peer's outbound path. Unreachable-peer messages are dropped
//! unless a [`MessageStore`] collaborator is configured, in which case they
//! are stored for replay when the peer connects.

use crate::error::NodeError;
use crate::inbox::Inbound;
use crate::node::NodeMetrics;
use crate::routes::RouteTable;
use agent_messenger_types::{Destination, Message, PeerId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// Registered by a local collaborator to receive `Local`-destined messages.
pub trait LocalConsumer: Send + Sync {
    /// Called by the router for each delivered message. Control frames
    /// never reach this.
    fn on_message(&self, message: Message);
}

impl<F: Fn(Message) + Send + Sync> LocalConsumer for F {
    fn on_message(&self, message: Message) {
        self(message)
    }
}

/// Optional persistence collaborator for store-and-forward.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message for a currently-unreachable destination.
    async fn store(&self, message: &Message) -> Result<(), NodeError>;

    /// Drain stored messages for `peer` with sequence greater than `since`.
    async fn replay(&self, peer: &PeerId, since: u64) -> Result<Vec<Message>, NodeError>;
}

/// In-memory store, keyed by destination peer. Replay drains.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pending: Mutex<HashMap<PeerId, Vec<Message>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages pending for a peer.
    pub fn pending_for(&self, peer: &PeerId) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.get(peer).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn store(&self, message: &Message) -> Result<(), NodeError> {
        let Destination::Peer(peer) = &message.destination else {
            return Err(NodeError::Store(
                "only peer-destined messages are stored".to_string(),
            ));
        };
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.entry(peer.clone()).or_default().push(message.clone());
        Ok(())
    }

    async fn replay(&self, peer: &PeerId, since: u64) -> Result<Vec<Message>, NodeError> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let Some(messages) = pending.remove(peer) else {
            return Ok(Vec::new());
        };
        Ok(messages
            .into_iter()
            .filter(|m| m.sequence > since)
            .collect())
    }
}

/// Why a message was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Destination was `Local` but no consumer is registered.
    NoConsumer,
    /// Destination peer has no live session and no store is configured.
    PeerUnreachable,
}

/// The result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the local consumer.
    Delivered,
    /// Enqueued on a connected peer's outbound path.
    Forwarded(PeerId),
    /// Fanned out; each attempt independent.
    Broadcast {
        forwarded: usize,
        failed: Vec<PeerId>,
    },
    /// Persisted for later replay to an unreachable peer.
    Stored(PeerId),
    /// Not deliverable.
    Dropped(DropReason),
}

/// Dispatches decoded messages to consumers and peers.
pub struct Router {
    routes: RouteTable,
    consumer: RwLock<Option<Arc<dyn LocalConsumer>>>,
    store: Option<Arc<dyn MessageStore>>,
    metrics: Arc<NodeMetrics>,
}

impl Router {
    /// Create a router over the given route table.
    pub fn new(
        routes: RouteTable,
        store: Option<Arc<dyn MessageStore>>,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            routes,
            consumer: RwLock::new(None),
            store,
            metrics,
        }
    }

    /// Register the local consumer callback. Replaces any previous one.
    pub fn register_consumer(&self, consumer: Arc<dyn LocalConsumer>) {
        let mut slot = self.consumer.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(consumer);
    }

    /// The configured message store, if any.
    pub fn store(&self) -> Option<&Arc<dyn MessageStore>> {
        self.store.as_ref()
    }

    /// Dispatch one inbound message. Control frames are handled by the
    /// session layer and must not reach this point.
    pub async fn dispatch(&self, inbound: Inbound) -> DispatchOutcome {
        let message = inbound.message;
        if inbound.gap {
            warn!(
                sender = %message.sender,
                sequence = message.sequence,
                "delivering message after sequence gap"
            );
        }

        match message.destination.clone() {
            Destination::Local => self.deliver_local(message),
            Destination::Broadcast => self.broadcast(message).await,
            Destination::Peer(peer) => self.forward(peer, message).await,
        }
    }

    fn deliver_local(&self, message: Message) -> DispatchOutcome {
        let consumer = {
            let slot = self.consumer.read().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        match consumer {
            Some(consumer) => {
                debug!(
                    sender = %message.sender,
                    sequence = message.sequence,
                    "delivering to local consumer"
                );
                consumer.on_message(message);
                self.metrics.record_delivered();
                DispatchOutcome::Delivered
            }
            None => {
                warn!(sender = %message.sender, "no local consumer registered");
                self.metrics.record_dropped();
                DispatchOutcome::Dropped(DropReason::NoConsumer)
            }
        }
    }

    /// Fan out to every connected peer except the sender. Each attempt is
    /// independent; a full or closed outbound queue counts as that peer
    /// failing without failing the whole dispatch.
    async fn broadcast(&self, message: Message) -> DispatchOutcome {
        let mut forwarded = 0;
        let mut failed = Vec::new();

        for entry in self.routes.connected() {
            if entry.peer_id == message.sender {
                continue;
            }
            match entry.outbound.try_send(message.clone()) {
                Ok(()) => forwarded += 1,
                Err(e) => {
                    warn!(peer = %entry.peer_id, error = %e, "broadcast forward failed");
                    failed.push(entry.peer_id.clone());
                }
            }
        }

        self.metrics.record_forwarded_n(forwarded as u64);
        DispatchOutcome::Broadcast { forwarded, failed }
    }

    /// Forward to one connected peer, awaiting on a full outbound queue so
    /// backpressure propagates to the inbound session.
    async fn forward(&self, peer: PeerId, message: Message) -> DispatchOutcome {
        if let Some(entry) = self.routes.get(&peer) {
            if entry.state == crate::routes::SessionState::Active
                && entry.outbound.send(message.clone()).await.is_ok()
            {
                self.metrics.record_forwarded();
                return DispatchOutcome::Forwarded(peer);
            }
        }

        if let Some(store) = &self.store {
            match store.store(&message).await {
                Ok(()) => {
                    debug!(peer = %peer, "stored message for unreachable peer");
                    return DispatchOutcome::Stored(peer);
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "store failed; dropping message");
                }
            }
        }

        self.metrics.record_dropped();
        DispatchOutcome::Dropped(DropReason::PeerUnreachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{RouteEntry, SessionState};
    use agent_messenger_types::MessageKind;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::{mpsc, watch};

    fn make_router(routes: RouteTable, store: Option<Arc<dyn MessageStore>>) -> Router {
        Router::new(routes, store, Arc::new(NodeMetrics::new()))
    }

    fn data(sender: &str, destination: Destination) -> Inbound {
        Inbound {
            message: Message {
                sequence: 1,
                sender: PeerId::from(sender),
                destination,
                kind: MessageKind::Data,
                payload: b"hi".to_vec(),
            },
            gap: false,
        }
    }

    fn route(routes: &RouteTable, peer: &str, capacity: usize) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(capacity);
        let (close_tx, _) = watch::channel(false);
        routes.insert(RouteEntry {
            peer_id: PeerId::from(peer),
            address: "memory".to_string(),
            state: SessionState::Active,
            connected_at: Utc::now(),
            last_seen: Utc::now(),
            session: 1,
            outbound: tx,
            close: close_tx,
        });
        rx
    }

    #[tokio::test]
    async fn test_local_delivery() {
        let router = make_router(RouteTable::new(), None);
        let received = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        router.register_consumer(Arc::new(move |msg: Message| {
            sink.lock().unwrap().push(msg);
        }));

        let outcome = router.dispatch(data("alice", Destination::Local)).await;
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_without_consumer_dropped() {
        let router = make_router(RouteTable::new(), None);
        let outcome = router.dispatch(data("alice", Destination::Local)).await;
        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::NoConsumer));
    }

    #[tokio::test]
    async fn test_forward_to_connected_peer() {
        let routes = RouteTable::new();
        let mut rx = route(&routes, "bob", 4);
        let router = make_router(routes, None);

        let outcome = router
            .dispatch(data("alice", Destination::Peer(PeerId::from("bob"))))
            .await;
        assert_eq!(outcome, DispatchOutcome::Forwarded(PeerId::from("bob")));
        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.sender, PeerId::from("alice"));
    }

    #[tokio::test]
    async fn test_unreachable_peer_dropped_without_store() {
        let router = make_router(RouteTable::new(), None);
        let outcome = router
            .dispatch(data("alice", Destination::Peer(PeerId::from("ghost"))))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Dropped(DropReason::PeerUnreachable)
        );
    }

    #[tokio::test]
    async fn test_unreachable_peer_stored_with_store() {
        let store = Arc::new(MemoryStore::new());
        let router = make_router(RouteTable::new(), Some(store.clone()));
        let outcome = router
            .dispatch(data("alice", Destination::Peer(PeerId::from("ghost"))))
            .await;
        assert_eq!(outcome, DispatchOutcome::Stored(PeerId::from("ghost")));
        assert_eq!(store.pending_for(&PeerId::from("ghost")), 1);

        let replayed = store.replay(&PeerId::from("ghost"), 0).await.unwrap();
        assert_eq!(replayed.len(), 1);
        // Replay drains
        assert_eq!(store.pending_for(&PeerId::from("ghost")), 0);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let routes = RouteTable::new();
        let mut alice_rx = route(&routes, "alice", 4);
        let mut bob_rx = route(&routes, "bob", 4);
        let router = make_router(routes, None);

        let outcome = router.dispatch(data("alice", Destination::Broadcast)).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Broadcast {
                forwarded: 1,
                failed: vec![]
            }
        );
        assert!(bob_rx.try_recv().is_ok());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_partial_failure_is_independent() {
        let routes = RouteTable::new();
        // bob's queue is capacity 1 and already full
        let mut bob_rx = route(&routes, "bob", 1);
        let bob_entry = routes.get(&PeerId::from("bob")).unwrap();
        bob_entry
            .outbound
            .try_send(Message::data(
                PeerId::from("x"),
                Destination::Local,
                vec![],
            ))
            .unwrap();
        let mut carol_rx = route(&routes, "carol", 4);
        let router = make_router(routes, None);

        let outcome = router.dispatch(data("alice", Destination::Broadcast)).await;
        match outcome {
            DispatchOutcome::Broadcast { forwarded, failed } => {
                assert_eq!(forwarded, 1);
                assert_eq!(failed, vec![PeerId::from("bob")]);
            }
            other => panic!("Expected Broadcast, got {other:?}"),
        }
        assert!(carol_rx.try_recv().is_ok());
        let _ = bob_rx.try_recv();
    }
}

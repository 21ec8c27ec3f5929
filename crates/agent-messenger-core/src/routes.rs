//! Route table — peer-id to live-session lookup.
//!
//! The table holds one entry per connected peer: the session's outbound
//! sender, a close signal, and bookkeeping timestamps. It is mutated only by
//! the listener core (session setup/teardown); routing reads take cloned
//! snapshots so a dispatch never observes a session mid-teardown.

use agent_messenger_types::{Message, PeerId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Session state as recorded on a route entry. A route is installed only
/// after the identity exchange, so pre-handshake phases never appear here;
/// a closed session has no entry at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SessionState {
    /// Fully established, messages flowing.
    Active,
    /// Closing; queued outbound flushed best-effort within the grace period.
    Draining,
}

/// One connected peer's route.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// The remote peer's stable identifier.
    pub peer_id: PeerId,
    /// Remote address, for logs and status output.
    pub address: String,
    /// Current session state.
    pub state: SessionState,
    /// When the handshake completed.
    pub connected_at: DateTime<Utc>,
    /// Last time any frame arrived from this peer.
    pub last_seen: DateTime<Utc>,
    /// Token distinguishing this session from a reconnect under the same
    /// peer id; teardown only removes the entry it installed.
    pub session: u64,
    /// Outbound path into the session's writer.
    pub outbound: mpsc::Sender<Message>,
    /// Close signal observed by the session's read loop.
    pub close: watch::Sender<bool>,
}

impl RouteEntry {
    /// Ask this session to shut down.
    pub fn request_close(&self) {
        let _ = self.close.send(true);
    }
}

/// Thread-safe map of connected peers. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    peers: Arc<RwLock<HashMap<PeerId, RouteEntry>>>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a route after a successful handshake. A reconnect under the
    /// same peer id replaces the stale entry.
    pub fn insert(&self, entry: RouteEntry) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.insert(entry.peer_id.clone(), entry);
    }

    /// Remove a route, but only if it still belongs to the given session.
    pub fn remove_session(&self, peer_id: &PeerId, session: u64) -> Option<RouteEntry> {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        match peers.get(peer_id) {
            Some(entry) if entry.session == session => peers.remove(peer_id),
            _ => None,
        }
    }

    /// Update a session's state, if the entry still belongs to it.
    pub fn mark(&self, peer_id: &PeerId, session: u64, state: SessionState) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(peer_id) {
            if entry.session == session {
                entry.state = state;
            }
        }
    }

    /// Refresh a peer's last-seen timestamp.
    pub fn touch(&self, peer_id: &PeerId) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(peer_id) {
            entry.last_seen = Utc::now();
        }
    }

    /// Snapshot of one peer's route.
    pub fn get(&self, peer_id: &PeerId) -> Option<RouteEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(peer_id).cloned()
    }

    /// Snapshot of all active routes.
    pub fn connected(&self) -> Vec<RouteEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|e| e.state == SessionState::Active)
            .cloned()
            .collect()
    }

    /// Peer ids of all active routes.
    pub fn connected_ids(&self) -> Vec<PeerId> {
        self.connected().into_iter().map(|e| e.peer_id).collect()
    }

    /// Number of active routes.
    pub fn connected_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|e| e.state == SessionState::Active)
            .count()
    }

    /// Active routes silent for longer than `timeout`.
    pub fn idle(&self, timeout: Duration) -> Vec<RouteEntry> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|e| e.state == SessionState::Active && e.last_seen < cutoff)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(peer: &str, session: u64) -> (RouteEntry, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(4);
        let (close_tx, _close_rx) = watch::channel(false);
        (
            RouteEntry {
                peer_id: PeerId::from(peer),
                address: "memory".to_string(),
                state: SessionState::Active,
                connected_at: Utc::now(),
                last_seen: Utc::now(),
                session,
                outbound: tx,
                close: close_tx,
            },
            rx,
        )
    }

    #[test]
    fn test_insert_and_get() {
        let table = RouteTable::new();
        let (e, _rx) = entry("alice", 1);
        table.insert(e);
        let got = table.get(&PeerId::from("alice")).unwrap();
        assert_eq!(got.state, SessionState::Active);
        assert_eq!(table.connected_count(), 1);
    }

    #[test]
    fn test_remove_requires_matching_session() {
        let table = RouteTable::new();
        let (e, _rx) = entry("alice", 1);
        table.insert(e);
        // A reconnect (session 2) replaced the route; the stale session's
        // teardown must not remove it
        let (e2, _rx2) = entry("alice", 2);
        table.insert(e2);
        assert!(table.remove_session(&PeerId::from("alice"), 1).is_none());
        assert_eq!(table.connected_count(), 1);
        assert!(table.remove_session(&PeerId::from("alice"), 2).is_some());
        assert_eq!(table.connected_count(), 0);
    }

    #[test]
    fn test_mark_draining_excludes_from_connected() {
        let table = RouteTable::new();
        let (e, _rx) = entry("alice", 1);
        table.insert(e);
        table.mark(&PeerId::from("alice"), 1, SessionState::Draining);
        assert_eq!(table.connected_count(), 0);
        assert!(table.get(&PeerId::from("alice")).is_some());
    }

    #[test]
    fn test_idle_detection() {
        let table = RouteTable::new();
        let (mut e, _rx) = entry("alice", 1);
        e.last_seen = Utc::now() - chrono::Duration::seconds(60);
        table.insert(e);
        let (e2, _rx2) = entry("bob", 2);
        table.insert(e2);

        let idle = table.idle(Duration::from_secs(30));
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].peer_id, PeerId::from("alice"));

        table.touch(&PeerId::from("alice"));
        assert!(table.idle(Duration::from_secs(30)).is_empty());
    }
}

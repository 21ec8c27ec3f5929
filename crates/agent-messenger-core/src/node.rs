//! Listener node — composition root.
//!
//! A [`Node`] binds a transport, accepts peer connections, and supervises
//! one session per connection. Background tasks send periodic heartbeats
//! and drain sessions whose peers have gone silent. A slow or stalled peer
//! never prevents new connections from being accepted.

use crate::error::NodeError;
use crate::router::{LocalConsumer, MessageStore, Router};
use crate::routes::{RouteTable, SessionState};
use crate::session::{run_session, SessionContext};
use agent_messenger_types::{MessengerConfig, PeerId};
use agent_messenger_wire::{ControlFrame, TcpTransport, Transport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Operator-visible counters. All relaxed; read via [`NodeMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct NodeMetrics {
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    frames_received: AtomicU64,
    duplicates_dropped: AtomicU64,
    gaps_detected: AtomicU64,
    delivered: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    handshake_failures: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub frames_received: u64,
    pub duplicates_dropped: u64,
    pub gaps_detected: u64,
    pub delivered: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub handshake_failures: u64,
}

impl NodeMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gap(&self) {
        self.gaps_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded_n(&self, n: u64) {
        self.forwarded.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy out the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
        }
    }
}

/// One connected peer in the status output.
#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub peer_id: PeerId,
    pub address: String,
    pub state: SessionState,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Operator-visible node status.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: PeerId,
    pub local_addr: String,
    pub peers: Vec<PeerStatus>,
    pub metrics: MetricsSnapshot,
}

/// The listener node. Owns the accept loop and all session lifecycles.
pub struct Node {
    node_id: PeerId,
    config: MessengerConfig,
    routes: RouteTable,
    router: Arc<Router>,
    metrics: Arc<NodeMetrics>,
    shutdown_tx: watch::Sender<bool>,
    local_addr: String,
    session_counter: AtomicU64,
}

impl Node {
    /// Bind the configured TCP address and start. A bind failure is fatal
    /// for startup and maps to a non-zero process exit.
    pub async fn bind(
        config: MessengerConfig,
        store: Option<Arc<dyn MessageStore>>,
    ) -> Result<(Arc<Self>, JoinHandle<()>), NodeError> {
        let transport = TcpTransport::bind(config.listen_addr)
            .await
            .map_err(|source| NodeError::Bind {
                addr: config.listen_addr.to_string(),
                source,
            })?;
        Ok(Self::start(config, transport, store))
    }

    /// Start over an already-bound transport. Returns the node handle and
    /// the accept-loop task.
    pub fn start<T: Transport>(
        config: MessengerConfig,
        transport: T,
        store: Option<Arc<dyn MessageStore>>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let node_id = config
            .node_id
            .clone()
            .map(PeerId::from)
            .unwrap_or_else(PeerId::generate);
        let local_addr = transport.local_addr();
        let routes = RouteTable::new();
        let metrics = Arc::new(NodeMetrics::new());
        let router = Arc::new(Router::new(routes.clone(), store, Arc::clone(&metrics)));
        let (shutdown_tx, _) = watch::channel(false);

        let node = Arc::new(Self {
            node_id,
            config,
            routes,
            router,
            metrics,
            shutdown_tx,
            local_addr,
            session_counter: AtomicU64::new(0),
        });

        info!(
            addr = %node.local_addr,
            node_id = %node.node_id,
            "listening"
        );

        node.spawn_heartbeat_task();
        node.spawn_idle_sweep_task();

        let accept_node = Arc::clone(&node);
        let accept_handle = tokio::spawn(async move {
            accept_node.accept_loop(transport).await;
        });

        (node, accept_handle)
    }

    /// This node's peer ID.
    pub fn node_id(&self) -> &PeerId {
        &self.node_id
    }

    /// The address the node is reachable at.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// The route table (lookup only; mutated by the node).
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Operator-visible metrics.
    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    /// Register the local consumer for `Local`-destined messages.
    pub fn register_consumer(&self, consumer: Arc<dyn LocalConsumer>) {
        self.router.register_consumer(consumer);
    }

    /// Snapshot the node's status for the operator surface.
    pub fn status(&self) -> NodeStatus {
        let peers = self
            .routes
            .connected()
            .into_iter()
            .map(|e| PeerStatus {
                peer_id: e.peer_id,
                address: e.address,
                state: e.state,
                connected_at: e.connected_at,
                last_seen: e.last_seen,
            })
            .collect();
        NodeStatus {
            node_id: self.node_id.clone(),
            local_addr: self.local_addr.clone(),
            peers,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Trigger a graceful shutdown: notify peers, then drain every session.
    pub fn shutdown(&self) {
        info!(node_id = %self.node_id, "initiating graceful shutdown");
        for entry in self.routes.connected() {
            if let Ok(msg) = ControlFrame::Disconnect.into_message(self.node_id.clone()) {
                let _ = entry.outbound.try_send(msg);
            }
        }
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.subscribe().borrow()
    }

    async fn accept_loop<T: Transport>(self: Arc<Self>, mut transport: T) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = transport.accept() => match accepted {
                    Ok((conn, addr)) => {
                        let ctx = SessionContext {
                            node_id: self.node_id.clone(),
                            config: self.config.clone(),
                            routes: self.routes.clone(),
                            router: Arc::clone(&self.router),
                            metrics: Arc::clone(&self.metrics),
                            shutdown: self.shutdown_tx.subscribe(),
                            session: self.session_counter.fetch_add(1, Ordering::Relaxed) + 1,
                        };
                        tokio::spawn(run_session(ctx, conn, addr));
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        }
        info!(node_id = %self.node_id, "accept loop stopped");
    }

    /// Periodic heartbeat to every connected peer. Send errors are ignored;
    /// a dead link is caught by the idle sweep.
    fn spawn_heartbeat_task(self: &Arc<Self>) {
        let node = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.config.heartbeat_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        for entry in node.routes.connected() {
                            if let Ok(msg) =
                                ControlFrame::Heartbeat.into_message(node.node_id.clone())
                            {
                                let _ = entry.outbound.try_send(msg);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Drain sessions whose peers have been silent past the idle timeout.
    fn spawn_idle_sweep_task(self: &Arc<Self>) {
        let node = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.config.heartbeat_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        for entry in node.routes.idle(node.config.peer_timeout()) {
                            warn!(peer = %entry.peer_id, "peer idle beyond timeout; closing session");
                            entry.request_close();
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_messenger_wire::MemoryTransport;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (transport, _connector) = MemoryTransport::new();
        let config = MessengerConfig {
            node_id: Some("node-1".to_string()),
            ..Default::default()
        };
        let (node, accept) = Node::start(config, transport, None);
        assert_eq!(node.node_id().as_str(), "node-1");
        assert_eq!(node.local_addr(), "memory");
        assert!(!node.is_shutting_down());

        node.shutdown();
        assert!(node.is_shutting_down());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_status_empty() {
        let (transport, _connector) = MemoryTransport::new();
        let (node, accept) = Node::start(MessengerConfig::default(), transport, None);
        let status = node.status();
        assert!(status.peers.is_empty());
        assert_eq!(status.metrics.sessions_opened, 0);
        // Serializes for the operator surface
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("sessions_opened"));
        node.shutdown();
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let metrics = NodeMetrics::new();
        metrics.record_frame();
        metrics.record_frame();
        metrics.record_gap();
        let snap = metrics.snapshot();
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.gaps_detected, 1);
        assert_eq!(snap.delivered, 0);
    }
}

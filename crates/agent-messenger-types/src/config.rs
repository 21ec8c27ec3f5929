//! Messenger configuration with serde defaults.
//!
//! The configuration surface is supplied externally (TOML file or CLI
//! flags); the core only consumes the resulting [`MessengerConfig`].

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:4690";

fn default_listen_addr() -> SocketAddr {
    DEFAULT_LISTEN_ADDR.parse().expect("default addr is valid")
}

fn default_queue_capacity() -> usize {
    256
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_max_frame_bytes() -> u32 {
    1024 * 1024
}

fn default_flush_grace_ms() -> u64 {
    2_000
}

fn default_heartbeat_interval_secs() -> u64 {
    5
}

fn default_peer_timeout_secs() -> u64 {
    15
}

/// Configuration for a listener node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,
    /// This node's ID. Generated at startup when absent.
    pub node_id: Option<String>,
    /// Per-session inbox/outbound queue capacity.
    pub queue_capacity: usize,
    /// How long a new connection may sit without a Hello frame.
    pub handshake_timeout_ms: u64,
    /// Hard per-frame size ceiling (body bytes).
    pub max_frame_bytes: u32,
    /// Best-effort flush window when a session drains.
    pub flush_grace_ms: u64,
    /// Interval between outbound heartbeat control frames.
    pub heartbeat_interval_secs: u64,
    /// Idle window after which a silent peer's session is drained.
    pub peer_timeout_secs: u64,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            node_id: None,
            queue_capacity: default_queue_capacity(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            flush_grace_ms: default_flush_grace_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            peer_timeout_secs: default_peer_timeout_secs(),
        }
    }
}

impl MessengerConfig {
    /// Handshake timeout as a [`Duration`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Flush grace period as a [`Duration`].
    pub fn flush_grace(&self) -> Duration {
        Duration::from_millis(self.flush_grace_ms)
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Peer idle timeout as a [`Duration`].
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MessengerConfig::default();
        assert_eq!(config.listen_addr.port(), 4690);
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.max_frame_bytes, 1024 * 1024);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.peer_timeout(), Duration::from_secs(15));
        assert!(config.node_id.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: MessengerConfig = toml::from_str(
            r#"
            listen_addr = "0.0.0.0:9100"
            queue_capacity = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_addr.port(), 9100);
        assert_eq!(config.queue_capacity, 8);
        // Untouched fields keep their defaults
        assert_eq!(config.handshake_timeout_ms, 5_000);
        assert_eq!(config.flush_grace(), Duration::from_millis(2_000));
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config: MessengerConfig = toml::from_str("").unwrap();
        assert_eq!(config.listen_addr, MessengerConfig::default().listen_addr);
    }
}

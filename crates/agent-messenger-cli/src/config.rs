//! Configuration loading from `~/.agent-messenger/config.toml` with defaults.

use agent_messenger_types::MessengerConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load messenger configuration from a TOML file, with defaults.
///
/// Missing or malformed files never abort the command: a warning is logged
/// and the built-in defaults are used instead.
pub fn load_config(path: Option<&Path>) -> MessengerConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<MessengerConfig>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
    }

    MessengerConfig::default()
}

/// Default config path: `~/.agent-messenger/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agent-messenger")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/config.toml")));
        assert_eq!(config, MessengerConfig::default());
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            listen_addr = "127.0.0.1:9200"
            node_id = "station"
            queue_capacity = 32
            "#,
        )
        .unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config.listen_addr.port(), 9200);
        assert_eq!(config.node_id.as_deref(), Some("station"));
        assert_eq!(config.queue_capacity, 32);
        // Unspecified fields keep defaults
        assert_eq!(config.handshake_timeout_ms, 5_000);
    }

    #[test]
    fn malformed_toml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "listen_addr = not-an-address").unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config, MessengerConfig::default());
    }
}

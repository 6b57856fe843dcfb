//! Node configuration.
//!
//! Read from TOML. Every field has a default, so an empty document is a
//! valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use peershare_connection::ReconnectConfig;
use peershare_protocol::{DEFAULT_CHUNK_SIZE, TEXT_FALLBACK_LIMIT};
use peershare_transfer::{DeliveryCapabilities, SendOptions};
use serde::{Deserialize, Serialize};

/// Errors from loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identifier announced to other peers. Random when unset.
    #[serde(default = "default_peer_id")]
    pub peer_id: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Delay between chunk sends.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_keep_alive_interval_secs")]
    pub keep_alive_interval_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Directory for the durable chunk tier. Memory only when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
    /// Where the filesystem delivery strategy writes files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    #[serde(default = "default_text_fallback_limit")]
    pub text_fallback_limit: u64,
    /// Capacity of the node event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

/// Backoff settings for reconnecting dropped links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_peer_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_pacing_ms() -> u64 {
    1
}

fn default_keep_alive_interval_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_text_fallback_limit() -> u64 {
    TEXT_FALLBACK_LIMIT
}

fn default_event_buffer() -> usize {
    256
}

fn default_initial_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    15_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectSettings {
    pub fn to_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
            max_attempts: self.max_attempts,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: default_peer_id(),
            chunk_size: default_chunk_size(),
            pacing_ms: default_pacing_ms(),
            keep_alive_interval_secs: default_keep_alive_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            store_dir: None,
            download_dir: None,
            text_fallback_limit: default_text_fallback_limit(),
            event_buffer: default_event_buffer(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl NodeConfig {
    /// Default configuration with a fixed peer id.
    pub fn with_peer_id(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Loads a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), peer = %config.peer_id, "configuration loaded");
        Ok(config)
    }

    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            chunk_size: self.chunk_size,
            pacing: Duration::from_millis(self.pacing_ms),
        }
    }

    pub fn delivery_capabilities(&self) -> DeliveryCapabilities {
        DeliveryCapabilities {
            download_dir: self.download_dir.clone(),
            text_limit: self.text_fallback_limit,
            ..DeliveryCapabilities::default()
        }
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config.chunk_size, 256 * 1024);
        assert_eq!(config.pacing_ms, 1);
        assert_eq!(config.keep_alive_interval_secs, 30);
        assert_eq!(config.stale_after_secs, 60);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.text_fallback_limit, 100 * 1024 * 1024);
        assert_eq!(config.event_buffer, 256);
        assert!(config.store_dir.is_none());
        assert_eq!(config.reconnect, ReconnectSettings::default());
        assert!(uuid::Uuid::parse_str(&config.peer_id).is_ok());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = NodeConfig::from_toml_str(
            r#"
            peer_id = "alice"
            pacing_ms = 0
            store_dir = "/var/lib/peershare"

            [reconnect]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.peer_id, "alice");
        assert_eq!(config.pacing_ms, 0);
        assert_eq!(config.store_dir, Some(PathBuf::from("/var/lib/peershare")));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.initial_delay_ms, 250);

        let reconnect = config.reconnect.to_config();
        assert_eq!(reconnect.max_delay, Duration::from_secs(15));
        assert!(config.send_options().pacing.is_zero());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(matches!(
            NodeConfig::from_toml_str("chunk_size = \"big\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = NodeConfig::load(Path::new("/nonexistent/peershare.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn serializes_back_to_toml() {
        let config = NodeConfig::with_peer_id("bob");
        let text = toml::to_string(&config).unwrap();
        assert_eq!(NodeConfig::from_toml_str(&text).unwrap(), config);
    }
}

//! FeeSync Configuration
//!
//! This module provides configuration structures for the FeeSync
//! offline-first sync engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::model::ActorRole;

/// Main FeeSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSyncConfig {
    /// Device-specific configuration
    pub device: DeviceConfig,

    /// Remote backend configuration
    pub remote: RemoteConfig,

    /// Connectivity monitoring configuration
    #[serde(default)]
    pub connectivity: ConnectivityConfig,

    /// Sync orchestrator configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Reference data cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Signed-in actor for this device session
    pub session: SessionConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier
    pub id: String,

    /// Data directory for the queue and cache databases
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Remote backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the REST backend
    pub url: String,

    /// Project API key sent as the `apikey` header
    pub api_key: String,

    /// Session access token (bearer), falls back to the API key
    #[serde(default)]
    pub access_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

/// Connectivity monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// URL probed for reachability (defaults to the remote URL)
    #[serde(default)]
    pub probe_url: Option<String>,

    /// Probe interval in milliseconds
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// How long the link must stay up before a reconnect drain starts
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Sync orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Drain the queue when the session starts
    #[serde(default = "default_true")]
    pub on_start: bool,
}

/// Reference data cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default entry lifetime in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
}

/// Signed-in actor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Authenticated actor id
    pub actor_id: String,

    /// Actor role
    #[serde(default)]
    pub role: ActorRole,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_remote_timeout() -> u64 {
    30
}

fn default_probe_interval_ms() -> u64 {
    5000
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

fn default_debounce_ms() -> u64 {
    1500
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "127.0.0.1:8480".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/feesync")
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: None,
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { on_start: true }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl FeeSyncConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: FeeSyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.device.id.is_empty() {
            return Err(crate::Error::Config("device.id cannot be empty".into()));
        }

        if self.remote.url.is_empty() {
            return Err(crate::Error::Config("remote.url cannot be empty".into()));
        }

        if self.session.actor_id.is_empty() {
            return Err(crate::Error::Config("session.actor_id cannot be empty".into()));
        }

        if self.connectivity.probe_interval_ms == 0 {
            return Err(crate::Error::Config(
                "connectivity.probe_interval_ms must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.device.data_dir
    }

    /// Path of the durable write queue database
    pub fn queue_path(&self) -> PathBuf {
        self.device.data_dir.join("queue.db")
    }

    /// Path of the reference data cache database
    pub fn cache_path(&self) -> PathBuf {
        self.device.data_dir.join("cache.db")
    }

    /// URL probed for reachability
    pub fn probe_url(&self) -> &str {
        self.connectivity
            .probe_url
            .as_deref()
            .unwrap_or(&self.remote.url)
    }

    /// Get probe interval as Duration
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.connectivity.probe_interval_ms)
    }

    /// Get probe timeout as Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.connectivity.probe_timeout_ms)
    }

    /// Get reconnect debounce window as Duration
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.connectivity.debounce_ms)
    }

    /// Get default cache entry lifetime as Duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.default_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[device]
id = "device-7"
data_dir = "/tmp/feesync"

[remote]
url = "https://school.example.org"
api_key = "anon-key"

[connectivity]
probe_interval_ms = 2500

[session]
actor_id = "user-1"
role = "bursar"
"#;

        let config = FeeSyncConfig::from_str(toml).unwrap();
        assert_eq!(config.device.id, "device-7");
        assert_eq!(config.session.role, ActorRole::Bursar);
        assert_eq!(config.probe_interval(), Duration::from_millis(2500));
        assert_eq!(config.probe_url(), "https://school.example.org");
        assert_eq!(config.cache_ttl(), Duration::from_secs(86400));
        assert!(config.sync.on_start);
        assert_eq!(config.queue_path(), PathBuf::from("/tmp/feesync/queue.db"));
    }

    #[test]
    fn test_rejects_empty_remote_url() {
        let toml = r#"
[device]
id = "device-7"

[remote]
url = ""
api_key = "anon-key"

[session]
actor_id = "user-1"
"#;

        assert!(matches!(
            FeeSyncConfig::from_str(toml),
            Err(crate::Error::Config(_))
        ));
    }
}

//! Configuration loading for courier-relay.
//!
//! Configuration is loaded from a TOML file (default: `courier.toml`).

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for courier-relay.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Which message store backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-memory store; contents are lost on restart.
    Memory,
    /// Durable SQLite store.
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Store backend (default: memory).
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Path to the SQLite database file (sqlite backend only).
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Maximum message payload size in bytes (default: 256KB).
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum connection attempts per endpoint per minute (default: 10).
    #[serde(default = "default_connections_per_endpoint")]
    pub connections_per_endpoint: u32,
    /// Maximum sends per identity per minute (default: 100).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Global request rate across all clients, per second (default: 1000).
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,
    /// Timeout in seconds for receiving IDENTIFY after connection
    /// (default: 10). Connections that never identify are dropped.
    #[serde(default = "default_identify_timeout_secs")]
    pub identify_timeout_secs: u64,
    /// Maximum concurrent sessions across all identities (default: 10000).
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_backend() -> StorageBackend {
    StorageBackend::Memory
}

fn default_database_path() -> PathBuf {
    PathBuf::from("courier.db")
}

fn default_max_payload_size() -> usize {
    256 * 1024 // 256KB
}

fn default_connections_per_endpoint() -> u32 {
    10
}

fn default_messages_per_minute() -> u32 {
    100
}

fn default_global_requests_per_second() -> u32 {
    1000
}

fn default_identify_timeout_secs() -> u64 {
    10
}

fn default_max_concurrent_sessions() -> usize {
    10_000
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database: default_database_path(),
            max_payload_size: default_max_payload_size(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connections_per_endpoint: default_connections_per_endpoint(),
            messages_per_minute: default_messages_per_minute(),
            global_requests_per_second: default_global_requests_per_second(),
            identify_timeout_secs: default_identify_timeout_secs(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.max_payload_size, 256 * 1024);
        assert_eq!(config.limits.connections_per_endpoint, 10);
        assert_eq!(config.http.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[storage]
backend = "sqlite"
database = "/data/courier.db"
max_payload_size = 524288

[limits]
messages_per_minute = 50

[http]
bind_address = "0.0.0.0:9090"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.database, PathBuf::from("/data/courier.db"));
        assert_eq!(config.storage.max_payload_size, 524288);
        assert_eq!(config.limits.messages_per_minute, 50);
        assert_eq!(config.http.bind_address, "0.0.0.0:9090");
    }

    #[test]
    fn identify_timeout_has_default() {
        let config = Config::default();
        assert_eq!(config.limits.identify_timeout_secs, 10);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.limits.max_concurrent_sessions, 10_000);
        assert!(config.http.metrics_enabled);
    }

    #[test]
    fn partial_sections_use_defaults() {
        let toml = r#"
[limits]
identify_timeout_secs = 30
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.limits.identify_timeout_secs, 30);
        assert_eq!(config.limits.messages_per_minute, 100);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }
}

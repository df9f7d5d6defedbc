//! Engine configuration.
//!
//! Loaded from a TOML file or built in code. Every field has a default, so
//! an empty file is a valid configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Address of the sync server.
    #[serde(default = "default_server_address")]
    pub server_address: String,
    /// Client name reported to the server in logs.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Upper bound for one protocol exchange, in seconds (default: 60).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Restrictions older than this are re-requested, in seconds (default: 1 day).
    #[serde(default = "default_restriction_refresh_secs")]
    pub restriction_refresh_secs: u64,
    /// Delay before retrying after a failed key check, in seconds (default: 5 min).
    #[serde(default = "default_key_check_retry_secs")]
    pub key_check_retry_secs: u64,
    /// Delay before retrying after a network or server failure, in seconds (default: 15 min).
    #[serde(default = "default_network_retry_secs")]
    pub network_retry_secs: u64,
    /// Minimum interval between two conflict notifications of the same kind,
    /// in seconds (default: 1 day).
    #[serde(default = "default_notification_interval_secs")]
    pub notification_interval_secs: u64,
}

fn default_server_address() -> String {
    "sync.contactsync.example:443".to_string()
}

fn default_client_name() -> String {
    "contactsync".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_restriction_refresh_secs() -> u64 {
    24 * 60 * 60
}

fn default_key_check_retry_secs() -> u64 {
    5 * 60
}

fn default_network_retry_secs() -> u64 {
    15 * 60
}

fn default_notification_interval_secs() -> u64 {
    24 * 60 * 60
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            client_name: default_client_name(),
            request_timeout_secs: default_request_timeout_secs(),
            restriction_refresh_secs: default_restriction_refresh_secs(),
            key_check_retry_secs: default_key_check_retry_secs(),
            network_retry_secs: default_network_retry_secs(),
            notification_interval_secs: default_notification_interval_secs(),
        }
    }
}

impl SyncConfig {
    /// Default configuration for a server address.
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            ..Self::default()
        }
    }

    /// Set the client name.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the restriction refresh interval.
    pub fn with_restriction_refresh(mut self, interval: Duration) -> Self {
        self.restriction_refresh_secs = interval.as_secs();
        self
    }

    /// Set the retry delays.
    pub fn with_retry_delays(mut self, key_check: Duration, network: Duration) -> Self {
        self.key_check_retry_secs = key_check.as_secs();
        self.network_retry_secs = network.as_secs();
        self
    }

    /// Set the conflict notification interval.
    pub fn with_notification_interval(mut self, interval: Duration) -> Self {
        self.notification_interval_secs = interval.as_secs();
        self
    }

    /// Upper bound for one protocol exchange.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Restriction refresh interval.
    pub fn restriction_refresh(&self) -> Duration {
        Duration::from_secs(self.restriction_refresh_secs)
    }

    /// Delay before retrying after a failed key check.
    pub fn key_check_retry_delay(&self) -> Duration {
        Duration::from_secs(self.key_check_retry_secs)
    }

    /// Delay before retrying after a network or server failure.
    pub fn network_retry_delay(&self) -> Duration {
        Duration::from_secs(self.network_retry_secs)
    }

    /// Minimum interval between two conflict notifications of one kind.
    pub fn notification_interval(&self) -> Duration {
        Duration::from_secs(self.notification_interval_secs)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| ConfigError::ParseError {
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

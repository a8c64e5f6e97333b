//! Client configuration.
//!
//! Configuration is loaded from a TOML file or built in code:
//!
//! ```toml
//! [server]
//! url = "http://homeassistant.local:8123"
//! access_token = "eyJ..."
//!
//! [session]
//! reconnect_interval_ms = 2500
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Long-lived access token.
///
/// Never printed by `Debug` and wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the auth message only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if the token is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessToken([REDACTED])")
    }
}

/// Root configuration for the client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Server connection settings.
    pub server: ServerConfig,
    /// Session behaviour.
    #[serde(default)]
    pub session: SessionConfig,
}

/// Server connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server base URL (`http(s)://host:port`) or WebSocket endpoint.
    pub url: String,
    /// Long-lived access token.
    pub access_token: AccessToken,
}

/// Session behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Fixed delay before reconnecting after a lost connection (default: 2500).
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Largest correlation id before wrapping to 1 (default: u32::MAX).
    #[serde(default = "default_max_command_id")]
    pub max_command_id: u64,
    /// Ask the server to batch messages into JSON arrays (default: true).
    #[serde(default = "default_coalesce_messages")]
    pub coalesce_messages: bool,
    /// Lifecycle event buffer per listener (default: 32).
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

// Default value functions
fn default_reconnect_interval_ms() -> u64 {
    2500
}

fn default_max_command_id() -> u64 {
    u64::from(u32::MAX)
}

fn default_coalesce_messages() -> bool {
    true
}

fn default_event_buffer() -> usize {
    32
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_command_id: default_max_command_id(),
            coalesce_messages: default_coalesce_messages(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl SessionConfig {
    /// Reconnect interval as a duration.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl ClientConfig {
    /// Create a configuration with default session settings.
    pub fn new(url: &str, access_token: &str) -> Self {
        Self {
            server: ServerConfig {
                url: url.to_string(),
                access_token: AccessToken::new(access_token),
            },
            session: SessionConfig::default(),
        }
    }

    /// Set the reconnect interval.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.session.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the id wrap point.
    pub fn with_max_command_id(mut self, max_id: u64) -> Self {
        self.session.max_command_id = max_id;
        self
    }

    /// Enable or disable message coalescing.
    pub fn with_coalesce_messages(mut self, enabled: bool) -> Self {
        self.session.coalesce_messages = enabled;
        self
    }

    /// Set the lifecycle event buffer size.
    pub fn with_event_buffer(mut self, size: usize) -> Self {
        self.session.event_buffer = size;
        self
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

#![deny(unsafe_code)]

//! Configuration loading and validation for unixcall.
//!
//! Loads TOML configuration files and validates them. Provides the
//! [`AppConfig`] type as the central configuration structure, split into
//! a `[client]` section for outgoing exchanges, a `[server]` section for the
//! reference listener, and `[logging]`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Framing mode names accepted in `client.framing` and `server.framing`.
pub const FRAMING_MODES: [&str; 3] = ["unframed", "newline", "length-prefixed"];

/// Default Unix socket path shared by client and server.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/unix_socket";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Exchange client configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Reference server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for outgoing exchanges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Path of the Unix socket to connect to.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Framing mode: "unframed", "newline", or "length-prefixed".
    #[serde(default = "default_framing")]
    pub framing: String,

    /// Upper bound on the size of a reply payload in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_reply_bytes: usize,

    /// Connect timeout in milliseconds (0 = wait indefinitely).
    #[serde(default)]
    pub connect_timeout_ms: u64,

    /// Reply timeout in milliseconds (0 = wait indefinitely).
    #[serde(default)]
    pub read_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            framing: default_framing(),
            max_reply_bytes: default_max_bytes(),
            connect_timeout_ms: 0,
            read_timeout_ms: 0,
        }
    }
}

/// Configuration for the reference server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path the server binds its Unix socket at.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Framing mode, must match the clients talking to it.
    #[serde(default = "default_framing")]
    pub framing: String,

    /// Prefix prepended to the request text in every reply.
    #[serde(default = "default_reply_prefix")]
    pub reply_prefix: String,

    /// Upper bound on the size of a request payload in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_request_bytes: usize,

    /// How long to wait for a connection's request in milliseconds
    /// (0 = wait indefinitely).
    #[serde(default = "default_server_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            framing: default_framing(),
            reply_prefix: default_reply_prefix(),
            max_request_bytes: default_max_bytes(),
            read_timeout_ms: default_server_read_timeout_ms(),
        }
    }
}

fn default_socket_path() -> String {
    DEFAULT_SOCKET_PATH.to_string()
}

fn default_framing() -> String {
    "unframed".to_string()
}

fn default_max_bytes() -> usize {
    64 * 1024 // 64 KiB
}

fn default_server_read_timeout_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_reply_prefix() -> String {
    "Acknowledged: ".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading configuration");
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.socket_path.is_empty() {
            return Err(ConfigError::Validation(
                "client.socket_path must not be empty".to_string(),
            ));
        }
        if self.server.socket_path.is_empty() {
            return Err(ConfigError::Validation(
                "server.socket_path must not be empty".to_string(),
            ));
        }

        for (section, framing) in [
            ("client", &self.client.framing),
            ("server", &self.server.framing),
        ] {
            if !FRAMING_MODES.contains(&framing.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "{section}.framing must be one of {FRAMING_MODES:?}, got {framing:?}"
                )));
            }
        }

        if self.client.max_reply_bytes == 0 {
            return Err(ConfigError::Validation(
                "client.max_reply_bytes must be non-zero".to_string(),
            ));
        }
        if self.server.max_request_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.max_request_bytes must be non-zero".to_string(),
            ));
        }
        // Length-prefixed frames carry a u32 length.
        for (key, limit) in [
            ("client.max_reply_bytes", self.client.max_reply_bytes),
            ("server.max_request_bytes", self.server.max_request_bytes),
        ] {
            if limit > u32::MAX as usize {
                return Err(ConfigError::Validation(format!(
                    "{key} must not exceed {}",
                    u32::MAX
                )));
            }
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Validation(
                "logging.level must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

//! Configuration builders for tests.

use std::path::Path;

use unixcall_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .socket_path(listener.path())
///     .framing("newline")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    /// Point both client and server at `path`.
    pub fn socket_path(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().display().to_string();
        self.config.client.socket_path = path.clone();
        self.config.server.socket_path = path;
        self
    }

    /// Use the same framing on both sides.
    pub fn framing(mut self, framing: &str) -> Self {
        self.config.client.framing = framing.to_string();
        self.config.server.framing = framing.to_string();
        self
    }

    pub fn max_reply_bytes(mut self, limit: usize) -> Self {
        self.config.client.max_reply_bytes = limit;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.client.connect_timeout_ms = ms;
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.client.read_timeout_ms = ms;
        self
    }

    pub fn reply_prefix(mut self, prefix: &str) -> Self {
        self.config.server.reply_prefix = prefix.to_string();
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

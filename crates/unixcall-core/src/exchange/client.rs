//! Exchange client — one request, one reply, one connection.
//!
//! The client holds only the socket path, the per-call options, and an
//! optional cancellation token. Every [`call`](ExchangeClient::call) opens
//! a fresh [`Connection`] and closes it before returning.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use unixcall_config::ClientConfig;

use super::connection::Connection;
use super::error::ExchangeError;
use super::framing::{Framing, UnknownFraming};
use super::message::Message;

/// Per-call transport options.
#[derive(Debug, Clone)]
pub struct ExchangeOptions {
    pub framing: Framing,
    /// Largest reply payload accepted, in bytes.
    pub max_reply_bytes: usize,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            framing: Framing::Unframed,
            max_reply_bytes: 64 * 1024,
            connect_timeout: None,
            read_timeout: None,
        }
    }
}

impl ExchangeOptions {
    /// Build options from the `[client]` config section.
    pub fn from_config(config: &ClientConfig) -> Result<Self, UnknownFraming> {
        Ok(Self {
            framing: config.framing.parse()?,
            max_reply_bytes: config.max_reply_bytes,
            connect_timeout: millis(config.connect_timeout_ms),
            read_timeout: millis(config.read_timeout_ms),
        })
    }
}

/// Milliseconds from config, with 0 meaning no limit.
pub(crate) fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Client performing single-shot exchanges against a Unix socket path.
#[derive(Debug, Clone)]
pub struct ExchangeClient {
    socket_path: PathBuf,
    options: ExchangeOptions,
    cancel: CancellationToken,
}

impl ExchangeClient {
    /// Create a client for the given socket path with default options.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            options: ExchangeOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Create a client from the `[client]` config section.
    pub fn from_config(config: &ClientConfig) -> Result<Self, UnknownFraming> {
        Ok(Self::new(&config.socket_path).with_options(ExchangeOptions::from_config(config)?))
    }

    pub fn with_options(mut self, options: ExchangeOptions) -> Self {
        self.options = options;
        self
    }

    /// Abort suspended connects and reads when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn options(&self) -> &ExchangeOptions {
        &self.options
    }

    /// Check if something exists at the socket path (a listener is likely bound).
    pub fn socket_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Open a connection, ready for [`Connection::send`].
    pub async fn connect(&self) -> Result<Connection, ExchangeError> {
        let mut conn = Connection::new(
            self.socket_path.clone(),
            self.options.clone(),
            self.cancel.clone(),
        );
        conn.connect().await?;
        Ok(conn)
    }

    /// Run one complete exchange: connect, send `request`, receive the
    /// reply, close. The first error aborts the call.
    pub async fn call(&self, request: &Message) -> Result<Message, ExchangeError> {
        let started = Instant::now();

        let mut conn = self.connect().await?;
        let connect_elapsed = started.elapsed();

        let outcome = match conn.send(request).await {
            Ok(()) => conn.receive().await,
            Err(e) => Err(e),
        };
        conn.close().await;

        debug!(
            path = %self.socket_path.display(),
            request_id = request.id,
            ok = outcome.is_ok(),
            state = %conn.state(),
            connect_ms = connect_elapsed.as_micros() as f64 / 1000.0,
            total_ms = started.elapsed().as_micros() as f64 / 1000.0,
            "Exchange finished"
        );

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_client_creation() {
        let client = ExchangeClient::new("/tmp/test-unixcall-absent.sock");
        assert!(!client.socket_available());
        assert_eq!(client.options().framing, Framing::Unframed);
        assert_eq!(client.options().max_reply_bytes, 65536);
    }

    #[test]
    fn test_options_from_config() {
        let config = ClientConfig {
            socket_path: "/run/x.sock".to_string(),
            framing: "length-prefixed".to_string(),
            max_reply_bytes: 128,
            connect_timeout_ms: 0,
            read_timeout_ms: 1500,
        };
        let client = ExchangeClient::from_config(&config).unwrap();
        assert_eq!(client.socket_path(), Path::new("/run/x.sock"));
        assert_eq!(client.options().framing, Framing::LengthPrefixed);
        assert_eq!(client.options().max_reply_bytes, 128);
        assert_eq!(client.options().connect_timeout, None);
        assert_eq!(
            client.options().read_timeout,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_options_reject_unknown_framing() {
        let config = ClientConfig {
            framing: "xml".to_string(),
            ..ClientConfig::default()
        };
        assert!(ExchangeOptions::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_call_without_listener_is_connect_error() {
        let client = ExchangeClient::new("/tmp/nonexistent-unixcall.sock");
        let result = client.call(&Message::new("Hello, server!", 1)).await;
        assert!(matches!(result, Err(ExchangeError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_connect() {
        let token = CancellationToken::new();
        token.cancel();
        let client = ExchangeClient::new("/tmp/nonexistent-unixcall.sock").with_cancellation(token);

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Connect { .. }));
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::Interrupted));
    }
}

//! Reference server — answers each connection with one acknowledged message.
//!
//! Binds a Unix socket, reads one framed [`Message`] per connection and
//! replies with the same id and the text prefixed by
//! [`ServerOptions::reply_prefix`]. Connections are handled concurrently,
//! each on its own task.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use unixcall_config::ServerConfig;

use super::client::millis;
use super::framing::{Framing, UnknownFraming};
use super::message::Message;

/// How long in-flight connections may run after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long a connection may stay silent before its request is abandoned.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Errors from the reference server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("no request within {0:?}")]
    ReadTimeout(Duration),
}

/// Reply behaviour of the reference server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub framing: Framing,
    pub reply_prefix: String,
    pub max_request_bytes: usize,
    /// Deadline for a connection's request to arrive; `None` waits forever.
    pub read_timeout: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            framing: Framing::Unframed,
            reply_prefix: "Acknowledged: ".to_string(),
            max_request_bytes: 64 * 1024,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
        }
    }
}

impl ServerOptions {
    /// Build options from the `[server]` config section.
    pub fn from_config(config: &ServerConfig) -> Result<Self, UnknownFraming> {
        Ok(Self {
            framing: config.framing.parse()?,
            reply_prefix: config.reply_prefix.clone(),
            max_request_bytes: config.max_request_bytes,
            read_timeout: millis(config.read_timeout_ms),
        })
    }
}

/// The reply the reference server sends for `request`.
pub fn reply_to(request: &Message, prefix: &str) -> Message {
    Message {
        text: format!("{prefix}{}", request.text),
        id: request.id,
    }
}

/// Serve exchanges on the given Unix socket path.
///
/// Removes any stale socket file before binding. Runs until the shutdown
/// signal is received, then waits briefly for in-flight connections and
/// removes the socket file.
pub async fn serve(
    socket_path: &Path,
    options: ServerOptions,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), ServerError> {
    // Remove stale socket file if it exists
    if tokio::fs::try_exists(socket_path).await? {
        tokio::fs::remove_file(socket_path).await?;
    }

    if let Some(parent) = socket_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let listener = UnixListener::bind(socket_path).map_err(|source| ServerError::Bind {
        path: socket_path.to_path_buf(),
        source,
    })?;
    info!(
        path = %socket_path.display(),
        framing = %options.framing,
        "Exchange server listening"
    );

    let options = Arc::new(options);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Exchange server shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    connections.spawn(handle_connection(stream, Arc::clone(&options)));
                }
                Err(e) => warn!(error = %e, "Failed to accept connection"),
            },
        }
        while connections.try_join_next().is_some() {}
    }

    drop(listener);

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            "Aborting connections still open after shutdown grace period"
        );
        connections.shutdown().await;
    }

    tokio::fs::remove_file(socket_path).await.ok();
    info!("Exchange server stopped");
    Ok(())
}

async fn handle_connection(mut stream: UnixStream, options: Arc<ServerOptions>) {
    debug!("Connection accepted");
    match exchange_once(&mut stream, &options).await {
        Ok(reply) => debug!(id = reply.id, "Reply sent"),
        Err(e) => warn!(error = %e, "Dropping connection"),
    }
    stream.shutdown().await.ok();
}

async fn exchange_once(
    stream: &mut UnixStream,
    options: &ServerOptions,
) -> Result<Message, ServerError> {
    let read = options
        .framing
        .read_frame(stream, options.max_request_bytes);
    let bytes = match options.read_timeout {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| ServerError::ReadTimeout(limit))??,
        None => read.await?,
    };
    let request = Message::decode(&bytes)?;
    info!(id = request.id, text = %request.text, "Request received");

    let reply = reply_to(&request, &options.reply_prefix);
    options.framing.write_frame(stream, &reply.encode()?).await?;
    Ok(reply)
}

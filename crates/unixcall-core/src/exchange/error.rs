use std::io;
use std::path::PathBuf;

use super::connection::CallState;

/// Errors from a single exchange.
///
/// The first error encountered aborts the call; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// No listener at the path, not a socket, permission denied, cancelled,
    /// or timed out while connecting.
    #[error("failed to connect to socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The request could not be encoded or written.
    #[error("failed to send request: {0}")]
    Write(#[source] io::Error),

    /// The connection failed, closed, was cancelled, or timed out before a
    /// reply was read.
    #[error("failed to read reply: {0}")]
    Read(#[source] io::Error),

    /// The reply bytes are not a well-formed message.
    #[error("failed to parse reply: {0}")]
    Parse(#[source] serde_json::Error),

    /// The operation does not follow connect, send, receive order.
    #[error("cannot {operation} while the connection is {state}")]
    InvalidState {
        operation: &'static str,
        state: CallState,
    },
}

impl ExchangeError {
    /// The underlying I/O error kind, if this error came from the transport.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            ExchangeError::Connect { source, .. } => Some(source.kind()),
            ExchangeError::Write(e) | ExchangeError::Read(e) => Some(e.kind()),
            ExchangeError::Parse(_) | ExchangeError::InvalidState { .. } => None,
        }
    }
}

pub(crate) fn cancelled(during: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Interrupted,
        format!("cancelled while {during}"),
    )
}

pub(crate) fn timed_out(during: &str, limit: std::time::Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("timed out after {limit:?} while {during}"),
    )
}

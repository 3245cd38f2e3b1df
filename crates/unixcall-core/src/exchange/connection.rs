//! One connection, used for exactly one request and one reply.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::client::ExchangeOptions;
use super::error::{ExchangeError, cancelled, timed_out};
use super::message::Message;

/// Position of a connection in the call lifecycle.
///
/// `Idle → Connecting → Connected → Sending → AwaitingReply → Completed`,
/// with `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Connecting,
    Connected,
    Sending,
    AwaitingReply,
    Completed,
    Failed,
}

impl CallState {
    /// `Completed` and `Failed` end the call; the socket is closed by then.
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Completed | CallState::Failed)
    }

    fn as_str(self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Sending => "sending",
            CallState::AwaitingReply => "awaiting reply",
            CallState::Completed => "completed",
            CallState::Failed => "failed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Unix socket connection carrying a single exchange.
///
/// Each step checks the current [`CallState`]; calling them out of order
/// yields [`ExchangeError::InvalidState`] without touching the socket. Any
/// transport or parse failure moves the connection to `Failed` and closes it.
#[derive(Debug)]
pub struct Connection {
    path: PathBuf,
    options: ExchangeOptions,
    cancel: CancellationToken,
    stream: Option<UnixStream>,
    state: CallState,
}

impl Connection {
    /// Create an idle connection for `path`. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(
        path: impl Into<PathBuf>,
        options: ExchangeOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path: path.into(),
            options,
            cancel,
            stream: None,
            state: CallState::Idle,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Open the socket.
    pub async fn connect(&mut self) -> Result<(), ExchangeError> {
        self.expect("connect", CallState::Idle)?;
        self.state = CallState::Connecting;
        debug!(path = %self.path.display(), "Connecting");

        let attempt = guarded(
            &self.cancel,
            self.options.connect_timeout,
            "connecting",
            UnixStream::connect(&self.path),
        )
        .await;

        match attempt {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = CallState::Connected;
                Ok(())
            }
            Err(source) => {
                self.fail().await;
                Err(ExchangeError::Connect {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    /// Encode `message` and write it as one frame.
    pub async fn send(&mut self, message: &Message) -> Result<(), ExchangeError> {
        self.expect("send", CallState::Connected)?;
        self.state = CallState::Sending;

        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                self.fail().await;
                return Err(ExchangeError::Write(io::Error::new(
                    io::ErrorKind::InvalidData,
                    e,
                )));
            }
        };

        let framing = self.options.framing;
        let written = match self.stream.as_mut() {
            Some(stream) => framing.write_frame(stream, &payload).await,
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        };
        if let Err(e) = written {
            self.fail().await;
            return Err(ExchangeError::Write(e));
        }

        trace!(id = message.id, bytes = payload.len(), %framing, "Request sent");
        self.state = CallState::AwaitingReply;
        Ok(())
    }

    /// Wait for the reply and decode it. Closes the connection either way.
    pub async fn receive(&mut self) -> Result<Message, ExchangeError> {
        self.expect("receive", CallState::AwaitingReply)?;

        let framing = self.options.framing;
        let limit = self.options.max_reply_bytes;
        let read = match self.stream.as_mut() {
            Some(stream) => {
                guarded(
                    &self.cancel,
                    self.options.read_timeout,
                    "awaiting reply",
                    framing.read_frame(stream, limit),
                )
                .await
            }
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        };

        let bytes = match read {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fail().await;
                return Err(ExchangeError::Read(e));
            }
        };
        trace!(bytes = bytes.len(), "Reply received");

        match Message::decode(&bytes) {
            Ok(reply) => {
                self.state = CallState::Completed;
                self.release().await;
                Ok(reply)
            }
            Err(e) => {
                self.fail().await;
                Err(ExchangeError::Parse(e))
            }
        }
    }

    /// Release the socket. Safe to call any number of times and never fails.
    ///
    /// Closing a call that has not completed marks it `Failed`.
    pub async fn close(&mut self) {
        if !self.state.is_terminal() {
            self.state = CallState::Failed;
        }
        self.release().await;
    }

    fn expect(&self, operation: &'static str, state: CallState) -> Result<(), ExchangeError> {
        if self.state == state {
            Ok(())
        } else {
            Err(ExchangeError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    async fn fail(&mut self) {
        self.state = CallState::Failed;
        self.release().await;
    }

    async fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // The peer may already be gone.
            if let Err(e) = stream.shutdown().await {
                trace!(error = %e, "Shutdown after exchange failed");
            }
            debug!(path = %self.path.display(), state = %self.state, "Connection closed");
        }
    }
}

/// Run `fut` under an optional deadline, aborting early if `cancel` fires.
async fn guarded<F, T>(
    cancel: &CancellationToken,
    limit: Option<Duration>,
    during: &str,
    fut: F,
) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    let bounded = async {
        match limit {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or_else(|_| Err(timed_out(during, limit))),
            None => fut.await,
        }
    };
    cancel
        .run_until_cancelled(bounded)
        .await
        .unwrap_or_else(|| Err(cancelled(during)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    fn idle(path: &Path) -> Connection {
        Connection::new(path, ExchangeOptions::default(), CancellationToken::new())
    }

    /// Bind a listener that answers one connection with `reply`.
    fn answer_once(dir: &TempDir, reply: &'static [u8]) -> PathBuf {
        let path = dir.path().join("answer.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(reply).await;
        });
        path
    }

    #[test]
    fn test_terminal_states() {
        assert!(CallState::Completed.is_terminal());
        assert!(CallState::Failed.is_terminal());
        assert!(!CallState::AwaitingReply.is_terminal());
        assert_eq!(CallState::AwaitingReply.to_string(), "awaiting reply");
    }

    #[tokio::test]
    async fn test_connect_missing_socket_fails() {
        let dir = TempDir::new().unwrap();
        let mut conn = idle(&dir.path().join("nobody.sock"));

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Connect { .. }));
        assert_eq!(err.io_kind(), Some(io::ErrorKind::NotFound));
        assert_eq!(conn.state(), CallState::Failed);
    }

    #[tokio::test]
    async fn test_connect_to_regular_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain-file");
        std::fs::write(&path, b"not a socket").unwrap();

        let err = idle(&path).connect().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_full_lifecycle_states() {
        let dir = TempDir::new().unwrap();
        let path = answer_once(&dir, br#"{"text":"pong","id":9}"#);
        let mut conn = idle(&path);
        assert_eq!(conn.state(), CallState::Idle);

        conn.connect().await.unwrap();
        assert_eq!(conn.state(), CallState::Connected);

        conn.send(&Message::new("ping", 9)).await.unwrap();
        assert_eq!(conn.state(), CallState::AwaitingReply);

        let reply = conn.receive().await.unwrap();
        assert_eq!(reply, Message::new("pong", 9));
        assert_eq!(conn.state(), CallState::Completed);

        conn.close().await;
        assert_eq!(conn.state(), CallState::Completed);
    }

    #[tokio::test]
    async fn test_out_of_order_operations_rejected() {
        let dir = TempDir::new().unwrap();
        let path = answer_once(&dir, br#"{"text":"pong","id":1}"#);
        let mut conn = idle(&path);

        let err = conn.send(&Message::new("early", 1)).await.unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::InvalidState {
                operation: "send",
                state: CallState::Idle
            }
        ));
        assert!(conn.receive().await.is_err());

        conn.connect().await.unwrap();
        assert!(matches!(
            conn.connect().await,
            Err(ExchangeError::InvalidState { .. })
        ));
        assert!(matches!(
            conn.receive().await,
            Err(ExchangeError::InvalidState { .. })
        ));
        // Rejected operations leave the state untouched.
        assert_eq!(conn.state(), CallState::Connected);

        conn.send(&Message::new("ping", 1)).await.unwrap();
        assert!(matches!(
            conn.send(&Message::new("again", 2)).await,
            Err(ExchangeError::InvalidState { .. })
        ));
        conn.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = answer_once(&dir, br#"{"text":"pong","id":1}"#);
        let mut conn = idle(&path);
        conn.connect().await.unwrap();

        conn.close().await;
        conn.close().await;
        assert_eq!(conn.state(), CallState::Failed);

        // Closing a connection that never opened is fine too.
        let mut never = idle(&dir.path().join("unused.sock"));
        never.close().await;
        never.close().await;
    }

    #[tokio::test]
    async fn test_parse_failure_closes() {
        let dir = TempDir::new().unwrap();
        let path = answer_once(&dir, br#"{"text":"hi"}"#);
        let mut conn = idle(&path);
        conn.connect().await.unwrap();
        conn.send(&Message::new("ping", 1)).await.unwrap();

        let err = conn.receive().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Parse(_)));
        assert_eq!(err.io_kind(), None);
        assert_eq!(conn.state(), CallState::Failed);
    }

    #[tokio::test]
    async fn test_guard_times_out_suspended_connect() {
        let result = guarded(
            &CancellationToken::new(),
            Some(Duration::from_millis(20)),
            "connecting",
            std::future::pending::<io::Result<()>>(),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(err.to_string().contains("connecting"), "{err}");
    }

    #[tokio::test]
    async fn test_guard_cancels_suspended_connect() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = guarded(
            &cancel,
            None,
            "connecting",
            std::future::pending::<io::Result<()>>(),
        )
        .await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::Interrupted);
    }
}

//! In-process fake listener for exchange tests.
//!
//! A [`FakeListener`] binds a socket inside its own temp directory, accepts
//! exactly one connection, performs one read, and then reacts with a canned
//! behaviour. The temp directory (and the socket file) is removed when the
//! listener is dropped.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

const READ_BUFFER: usize = 64 * 1024;

enum Behaviour {
    /// Write these chunks in order, pausing between them, then close.
    Reply(Vec<Vec<u8>>),
    /// Close without writing anything.
    Close,
    /// Keep the connection open until the listener is dropped.
    Hang(oneshot::Receiver<()>),
}

/// The server side of a single scripted exchange.
pub struct FakeListener {
    path: PathBuf,
    received: oneshot::Receiver<Vec<u8>>,
    handle: JoinHandle<io::Result<()>>,
    _release: Option<oneshot::Sender<()>>,
    _dir: TempDir,
}

impl FakeListener {
    /// Reply with `bytes` verbatim after reading the request.
    pub async fn reply_with(bytes: impl Into<Vec<u8>>) -> Self {
        Self::start(Behaviour::Reply(vec![bytes.into()]), None)
    }

    /// Reply with several writes, letting the client observe a split payload.
    pub async fn reply_in_chunks(chunks: &[&str]) -> Self {
        let chunks = chunks.iter().map(|c| c.as_bytes().to_vec()).collect();
        Self::start(Behaviour::Reply(chunks), None)
    }

    /// Read the request, then close without replying.
    pub async fn close_without_reply() -> Self {
        Self::start(Behaviour::Close, None)
    }

    /// Read the request and never reply.
    pub async fn hang() -> Self {
        let (release_tx, release_rx) = oneshot::channel();
        Self::start(Behaviour::Hang(release_rx), Some(release_tx))
    }

    fn start(behaviour: Behaviour, release: Option<oneshot::Sender<()>>) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("fake.sock");
        let listener = UnixListener::bind(&path).expect("failed to bind fake listener");
        let (received_tx, received) = oneshot::channel();
        let handle = tokio::spawn(run(listener, behaviour, received_tx));

        Self {
            path,
            received,
            handle,
            _release: release,
            _dir: dir,
        }
    }

    /// Socket path the client should connect to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the scripted exchange to end and return the bytes the
    /// client sent. Errors if the listener side failed.
    pub async fn finish(self) -> io::Result<Vec<u8>> {
        self.handle
            .await
            .map_err(|e| io::Error::other(format!("fake listener task failed: {e}")))??;
        self.received
            .await
            .map_err(|_| io::Error::other("fake listener never read a request"))
    }
}

async fn run(
    listener: UnixListener,
    behaviour: Behaviour,
    received: oneshot::Sender<Vec<u8>>,
) -> io::Result<()> {
    let (mut stream, _) = listener.accept().await?;
    let mut buf = vec![0u8; READ_BUFFER];
    let n = stream.read(&mut buf).await?;
    buf.truncate(n);
    debug!(bytes = n, "Fake listener read request");
    let _ = received.send(buf);

    match behaviour {
        Behaviour::Reply(chunks) => {
            for chunk in chunks {
                stream.write_all(&chunk).await?;
                stream.flush().await?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            stream.shutdown().await?;
        }
        Behaviour::Close => stream.shutdown().await?,
        Behaviour::Hang(release) => {
            let _ = release.await;
        }
    }
    Ok(())
}

// ABOUTME: Client and server ends of a single-peer pipe, both yielding a framed channel.
// ABOUTME: Server binds first and accepts exactly one peer; client retries until a timeout.

use super::endpoint::socket_path;
use super::error::TransportError;
use super::framed::FramedChannel;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};

/// Framed channel over a connected pipe
pub type PipeChannel = FramedChannel<UnixStream>;

/// Delay between connection attempts while the server end is not there yet
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Server end of a named pipe that accepts a single peer.
///
/// The endpoint exists from [`ServerConnection::create`] until the peer has
/// connected (or the connection is dropped), so a name can safely be handed
/// to a client before [`ServerConnection::wait_for_connection`] is awaited.
pub struct ServerConnection {
    name: String,
    path: PathBuf,
    listener: UnixListener,
}

impl ServerConnection {
    /// Bind the endpoint for `name`, replacing any stale socket file.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(name: &str) -> Result<Self, TransportError> {
        let path = socket_path(name);
        remove_stale(&path)?;
        let listener = UnixListener::bind(&path)?;
        tracing::trace!(pipe = %name, path = %path.display(), "Pipe endpoint bound");
        Ok(Self {
            name: name.to_string(),
            path,
            listener,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until a peer connects, then retire the endpoint
    pub async fn wait_for_connection(self) -> Result<PipeChannel, TransportError> {
        let (stream, _) = self.listener.accept().await?;
        tracing::debug!(pipe = %self.name, "Peer connected");
        Ok(FramedChannel::new(stream))
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Client end of a named pipe
pub struct ClientConnection;

impl ClientConnection {
    /// Connect to the pipe called `name`, waiting at most `timeout` for the server end
    pub async fn connect(name: &str, timeout: Duration) -> Result<PipeChannel, TransportError> {
        let path = socket_path(name);
        let attempt = async {
            loop {
                match UnixStream::connect(&path).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) if is_not_listening(&e) => {
                        tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                    }
                    Err(e) => return Err(TransportError::Io(e)),
                }
            }
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(stream) => {
                tracing::debug!(pipe = %name, "Connected to pipe");
                Ok(FramedChannel::new(stream?))
            }
            Err(_) => Err(TransportError::Timeout {
                name: name.to_string(),
                timeout,
            }),
        }
    }
}

fn is_not_listening(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused)
}

pub(crate) fn remove_stale(path: &Path) -> Result<(), TransportError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TransportError::Io(e)),
    }
}

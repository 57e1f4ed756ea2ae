// ABOUTME: One-shot handshake that promotes a rendezvous connection to a private data pipe.
// ABOUTME: Agent sends its 16-byte id raw; agency answers with a framed `<base>_<n>` pipe name.

use super::connection::{remove_stale, ClientConnection, PipeChannel, ServerConnection};
use super::endpoint::{data_pipe_name, socket_path};
use super::error::TransportError;
use super::framed::FramedChannel;
use crate::identity::{AgentId, ID_LEN};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

/// How long an agent waits for either pipe to accept it
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the agency keeps a private pipe open for the agent it was promised to
const DATA_PIPE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a rendezvous connection may take to send its identity
pub const IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Agent side of the handshake
pub struct HandshakeClient {
    rendezvous: String,
    id: AgentId,
    timeout: Duration,
}

impl HandshakeClient {
    pub fn new(rendezvous: impl Into<String>, id: AgentId) -> Self {
        Self {
            rendezvous: rendezvous.into(),
            id,
            timeout: CONNECT_TIMEOUT,
        }
    }

    /// Override the per-connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Identify on the rendezvous pipe and learn the private pipe name
    pub async fn request_data_pipe(&self) -> Result<String, TransportError> {
        let mut rendezvous = ClientConnection::connect(&self.rendezvous, self.timeout).await?;
        rendezvous.write_bytes(self.id.as_bytes()).await?;
        let name: String = rendezvous.read_message().await?;
        drop(rendezvous);

        tracing::debug!(agent_id = %self.id, pipe = %name, "Assigned private data pipe");
        Ok(name)
    }

    /// Run the full handshake and return the connected private pipe
    pub async fn data_connection(&self) -> Result<PipeChannel, TransportError> {
        let name = self.request_data_pipe().await?;
        ClientConnection::connect(&name, self.timeout).await
    }
}

/// An agent whose private pipe is connected and ready for commands
pub struct AcceptedAgent {
    pub id: AgentId,
    pub pipe_name: String,
    pub channel: PipeChannel,
}

/// Agency side of the handshake: accepts on the rendezvous pipe forever
pub struct HandshakeServer {
    base: String,
    path: PathBuf,
    listener: UnixListener,
    next_pipe_id: Arc<AtomicU64>,
    identity_timeout: Duration,
    shutdown: CancellationToken,
}

impl HandshakeServer {
    /// Bind the rendezvous pipe called `base`
    pub fn bind(base: &str) -> Result<Self, TransportError> {
        let path = socket_path(base);
        remove_stale(&path)?;
        let listener = UnixListener::bind(&path)?;
        tracing::info!(rendezvous = %base, "Handshake server listening");

        Ok(Self {
            base: base.to_string(),
            path,
            listener,
            next_pipe_id: Arc::new(AtomicU64::new(0)),
            identity_timeout: IDENTITY_TIMEOUT,
            shutdown: CancellationToken::new(),
        })
    }

    /// Override how long a connection may stay silent before it is dropped
    pub fn with_identity_timeout(mut self, timeout: Duration) -> Self {
        self.identity_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.base
    }

    /// Token that stops the accept loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept rendezvous connections until shut down.
    ///
    /// Every connection is negotiated on its own task so a slow agent never
    /// holds up the next one. `on_connected` runs once per agent whose
    /// private pipe is connected.
    pub async fn run<F>(self, on_connected: F)
    where
        F: Fn(AcceptedAgent) + Send + Sync + 'static,
    {
        let on_connected = Arc::new(on_connected);

        loop {
            let stream = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::warn!(error = %e, "Rendezvous accept failed");
                        // Errors such as EMFILE repeat immediately
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                },
            };

            let base = self.base.clone();
            let counter = Arc::clone(&self.next_pipe_id);
            let on_connected = Arc::clone(&on_connected);
            let shutdown = self.shutdown.clone();
            let identity_timeout = self.identity_timeout;
            tokio::spawn(async move {
                let negotiated = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    result = negotiate(stream, &base, &counter, identity_timeout) => result,
                };
                match negotiated {
                    Ok(agent) => on_connected(agent),
                    Err(e) => tracing::warn!(error = %e, "Handshake failed"),
                }
            });
        }

        let _ = std::fs::remove_file(&self.path);
        tracing::info!(rendezvous = %self.base, "Handshake server stopped");
    }
}

async fn negotiate(
    stream: UnixStream,
    base: &str,
    counter: &AtomicU64,
    identity_timeout: Duration,
) -> Result<AcceptedAgent, TransportError> {
    let mut rendezvous = FramedChannel::new(stream);

    let raw = tokio::time::timeout(identity_timeout, rendezvous.read_bytes(ID_LEN))
        .await
        .map_err(|_| TransportError::Timeout {
            name: base.to_string(),
            timeout: identity_timeout,
        })??;
    let id = AgentId::from_slice(&raw).ok_or(TransportError::InvalidIdentity(raw.len()))?;

    // Bind before handing out the name so the agent can never race the endpoint
    let pipe_name = data_pipe_name(base, counter.fetch_add(1, Ordering::SeqCst) + 1);
    let data_pipe = ServerConnection::create(&pipe_name)?;

    rendezvous.write_message(&pipe_name).await?;
    drop(rendezvous);

    let channel = tokio::time::timeout(DATA_PIPE_TIMEOUT, data_pipe.wait_for_connection())
        .await
        .map_err(|_| TransportError::Timeout {
            name: pipe_name.clone(),
            timeout: DATA_PIPE_TIMEOUT,
        })??;

    tracing::info!(agent_id = %id, pipe = %pipe_name, "Agent connected on private pipe");
    Ok(AcceptedAgent {
        id,
        pipe_name,
        channel,
    })
}

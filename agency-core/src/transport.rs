// ABOUTME: Agency transport - owns the rendezvous pipe and registers agents as their handshakes complete.
// ABOUTME: Each accepted agent becomes a RemoteAgent that moves its store record from starting to ready.

use crate::proxy::RemoteAgent;
use crate::store::AgentStore;
use agency_agent::transport::AcceptedAgent;
use agency_agent::{HandshakeServer, TransportError};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Store of connected agents as the agency sees them
pub type AgentRegistry = AgentStore<Arc<RemoteAgent>>;

pub struct AgencyTransport {
    connection_point: String,
    store: Arc<AgentRegistry>,
    shutdown: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl AgencyTransport {
    /// Transport whose rendezvous pipe is `<name>_<unique suffix>`
    pub fn new(name: &str, store: Arc<AgentRegistry>) -> Self {
        let connection_point = format!("{}_{}", name, uuid::Uuid::new_v4().simple());
        Self {
            connection_point,
            store,
            shutdown: None,
            task: None,
        }
    }

    /// Rendezvous pipe name handed to launched agents
    pub fn connection_point(&self) -> &str {
        &self.connection_point
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Bind the rendezvous pipe and start accepting handshakes
    pub fn start(&mut self) -> Result<(), TransportError> {
        if self.is_running() {
            return Ok(());
        }

        let server = HandshakeServer::bind(&self.connection_point)?;
        let shutdown = server.shutdown_token();
        let store = Arc::clone(&self.store);

        let task = tokio::spawn(server.run(move |agent| register(&store, agent)));

        tracing::info!(connection_point = %self.connection_point, "Agency transport started");
        self.shutdown = Some(shutdown);
        self.task = Some(task);
        Ok(())
    }

    /// Stop accepting new agents; connected agents are unaffected
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Rendezvous task ended abnormally");
            }
        }
        tracing::info!(connection_point = %self.connection_point, "Agency transport stopped");
    }
}

impl Drop for AgencyTransport {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
    }
}

fn register(store: &AgentRegistry, accepted: AcceptedAgent) {
    crate::metrics::record_handshake();
    let id = accepted.id;
    let agent = Arc::new(RemoteAgent::new(id, accepted.channel));

    match store.register(id, agent) {
        Ok(()) => {
            crate::metrics::record_agent_registered();
            crate::metrics::set_ready_agents(store.ready_agents().len());
            tracing::info!(agent_id = %id, pipe = %accepted.pipe_name, "Agent registered");
        }
        Err(e) => {
            // Dropping the proxy closes the pipe, which ends the stray agent's loop
            crate::metrics::record_error("register");
            tracing::warn!(agent_id = %id, error = %e, "Rejected agent registration");
        }
    }
}

// ABOUTME: Agency orchestrator - launches an agent per request and waits for it to register.
// ABOUTME: Supervises agent processes, releases them on request and kills stalled ones.

use crate::config::AgencyConfig;
use crate::launcher::{AgentProcess, LaunchError, ProcessHandle};
use crate::proxy::RemoteAgent;
use crate::store::StoreError;
use crate::transport::{AgencyTransport, AgentRegistry};
use agency_agent::{AgentId, TestPackage, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How often a starting agent's record is polled
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Failures while starting an agent; retrying the whole start is appropriate
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("cannot launch agent: {0}")]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("rendezvous pipe unavailable: {0}")]
    Transport(#[from] TransportError),

    #[error("agent {0} exited before registering")]
    AgentExited(AgentId),

    #[error("agent {id} did not register within {timeout:?}")]
    StartupTimeout { id: AgentId, timeout: Duration },
}

/// Launches agents on demand and tracks them until they exit
pub struct Agency {
    config: AgencyConfig,
    store: Arc<AgentRegistry>,
    transport: AgencyTransport,
    watchdog: Option<JoinHandle<()>>,
}

impl Agency {
    /// Bind the rendezvous pipe and, when configured, start the liveness watchdog
    pub fn start(config: AgencyConfig) -> Result<Self, StartError> {
        let store = Arc::new(AgentRegistry::new());
        let mut transport = AgencyTransport::new(&config.name, Arc::clone(&store));
        transport.start()?;

        let watchdog = config
            .liveness_timeout()
            .map(|bound| tokio::spawn(watch_liveness(Arc::clone(&store), bound)));

        tracing::info!(
            connection_point = %transport.connection_point(),
            install_dir = %config.install_dir.display(),
            "Agency started"
        );

        Ok(Self {
            config,
            store,
            transport,
            watchdog,
        })
    }

    pub fn config(&self) -> &AgencyConfig {
        &self.config
    }

    pub fn connection_point(&self) -> &str {
        self.transport.connection_point()
    }

    pub fn store(&self) -> &Arc<AgentRegistry> {
        &self.store
    }

    /// Launch an agent for `package` and wait until it is ready to take commands
    pub async fn get_agent(&self, package: &TestPackage) -> Result<Arc<RemoteAgent>, StartError> {
        let id = AgentId::new();
        let process = AgentProcess::new(
            &self.config.install_dir,
            self.transport.connection_point(),
            package,
            id,
        )?;

        // The record must exist before the agent can connect and register
        let handle = ProcessHandle::pending();
        self.store.add_agent(id, handle.clone())?;
        let child = match process.launch() {
            Ok(child) => child,
            Err(e) => {
                self.store.discard(id);
                return Err(e.into());
            }
        };
        if let Some(pid) = child.id() {
            handle.attach(pid);
        }
        crate::metrics::record_agent_launched();
        tracing::info!(agent_id = %id, pid = ?handle.pid(), "Agent process started");

        tokio::spawn(supervise(id, child, handle.clone(), Arc::clone(&self.store)));

        let timeout = self.config.startup_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(agent) = self.store.is_ready(id) {
                return Ok(agent);
            }
            if self.store.is_agent_process_active(id).is_none() {
                crate::metrics::record_error("agent_exited");
                return Err(StartError::AgentExited(id));
            }
            if Instant::now() >= deadline {
                tracing::warn!(agent_id = %id, ?timeout, "Agent did not register in time");
                handle.kill();
                crate::metrics::record_agent_killed("startup_timeout");
                return Err(StartError::StartupTimeout { id, timeout });
            }
            tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        }
    }

    /// Ask a ready agent to stop; its supervisor records the exit
    pub async fn release_agent(&self, id: AgentId) {
        match self.store.is_ready(id) {
            Some(agent) => {
                if let Err(e) = agent.stop().await {
                    tracing::warn!(agent_id = %id, error = %e, "Failed to stop agent, killing it");
                    if let Some(process) = self.store.is_agent_process_active(id) {
                        process.kill();
                    }
                }
            }
            None => tracing::debug!(agent_id = %id, "Release requested for agent that is not ready"),
        }
    }

    /// Stop accepting agents and kill every agent still running
    pub async fn stop(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        self.transport.stop().await;

        for (id, process) in self.store.active_processes() {
            tracing::info!(agent_id = %id, "Killing agent on agency shutdown");
            process.kill();
        }
    }
}

impl Drop for Agency {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        for (_, process) in self.store.active_processes() {
            process.kill();
        }
    }
}

/// Own the child until it exits or a kill is requested, then mark it terminated
async fn supervise(id: AgentId, mut child: Child, handle: ProcessHandle, store: Arc<AgentRegistry>) {
    let kill = handle.kill_token();
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => tracing::info!(agent_id = %id, %status, "Agent process exited"),
            Err(e) => tracing::warn!(agent_id = %id, error = %e, "Failed to wait for agent process"),
        },
        _ = kill.cancelled() => {
            if let Err(e) = child.kill().await {
                tracing::warn!(agent_id = %id, error = %e, "Failed to kill agent process");
            } else {
                tracing::info!(agent_id = %id, "Agent process killed");
            }
        }
    }

    match store.mark_terminated(id) {
        Ok(()) => {
            crate::metrics::record_agent_terminated();
            crate::metrics::set_ready_agents(store.ready_agents().len());
        }
        Err(e) => tracing::error!(agent_id = %id, error = %e, "Failed to mark agent terminated"),
    }
}

/// Kill any ready agent whose outstanding call has gone quiet for longer than `bound`
async fn watch_liveness(store: Arc<AgentRegistry>, bound: Duration) {
    let period = (bound / 4).max(Duration::from_millis(100));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        for (id, agent) in store.ready_agents() {
            let Some(stalled) = agent.stalled_for() else {
                continue;
            };
            if stalled > bound {
                if let Some(process) = store
                    .is_agent_process_active(id)
                    .filter(|p| !p.kill_requested())
                {
                    tracing::warn!(agent_id = %id, ?stalled, "Agent unresponsive, killing it");
                    crate::metrics::record_agent_killed("liveness");
                    process.kill();
                }
            }
        }
    }
}

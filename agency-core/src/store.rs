// ABOUTME: Agent store - registry of every agent the agency started and where it is in its lifecycle.
// ABOUTME: Starting -> Ready -> Terminated (or Starting -> Terminated); one mutex guards the whole map.

use crate::launcher::ProcessHandle;
use agency_agent::AgentId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Lifecycle status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Starting,
    Ready,
    Terminated,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "ready" => Ok(Self::Ready),
            "terminated" => Ok(Self::Terminated),
            _ => anyhow::bail!("Unknown agent status: {}", s),
        }
    }
}

/// Contract violations against the store's state machine
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("an agent has already been started with the id '{0}'")]
    AlreadyStarted(AgentId),

    #[error("agent {id} must have a status of starting in order to register, but the status was {}", describe_status(.status))]
    NotStarting {
        id: AgentId,
        status: Option<AgentStatus>,
    },

    #[error("an entry for agent {0} must exist in order to mark it as terminated")]
    UnknownAgent(AgentId),
}

fn describe_status(status: &Option<AgentStatus>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// One agent's entry in the store
#[derive(Debug, Clone)]
pub struct AgentRecord<A> {
    pub status: AgentStatus,
    pub process: Option<ProcessHandle>,
    pub agent: Option<A>,
}

impl<A> AgentRecord<A> {
    pub fn starting(process: ProcessHandle) -> Self {
        Self {
            status: AgentStatus::Starting,
            process: Some(process),
            agent: None,
        }
    }

    pub fn ready(self, agent: A) -> Self {
        Self {
            status: AgentStatus::Ready,
            process: self.process,
            agent: Some(agent),
        }
    }

    pub fn terminated(self) -> Self {
        Self {
            status: AgentStatus::Terminated,
            process: None,
            agent: None,
        }
    }
}

/// Registry of agents keyed by identity.
///
/// `A` is whatever the agency hands out for a ready agent (a remote proxy in
/// production). Every operation takes the single lock for its whole duration
/// and none of them does I/O while holding it.
pub struct AgentStore<A> {
    agents: Mutex<HashMap<AgentId, AgentRecord<A>>>,
}

impl<A: Clone> AgentStore<A> {
    pub fn new() -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AgentId, AgentRecord<A>>> {
        self.agents.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track a process that is about to be launched; fails if the identity is already known
    pub fn add_agent(&self, id: AgentId, process: ProcessHandle) -> Result<(), StoreError> {
        let mut agents = self.lock();
        if agents.contains_key(&id) {
            return Err(StoreError::AlreadyStarted(id));
        }
        agents.insert(id, AgentRecord::starting(process));
        tracing::debug!(agent_id = %id, "Agent starting");
        Ok(())
    }

    /// Forget a starting record whose process never came up.
    ///
    /// Ready and terminated records are left alone.
    pub fn discard(&self, id: AgentId) {
        let mut agents = self.lock();
        if agents
            .get(&id)
            .is_some_and(|r| r.status == AgentStatus::Starting)
        {
            agents.remove(&id);
            tracing::debug!(agent_id = %id, "Agent discarded before launch");
        }
    }

    /// Attach the connected agent; only valid while the record is starting
    pub fn register(&self, id: AgentId, agent: A) -> Result<(), StoreError> {
        let mut agents = self.lock();
        let record = match agents.remove(&id) {
            Some(record) if record.status == AgentStatus::Starting => record,
            Some(record) => {
                let status = record.status;
                agents.insert(id, record);
                return Err(StoreError::NotStarting {
                    id,
                    status: Some(status),
                });
            }
            None => return Err(StoreError::NotStarting { id, status: None }),
        };
        agents.insert(id, record.ready(agent));
        tracing::debug!(agent_id = %id, "Agent ready");
        Ok(())
    }

    /// The registered agent, if its status is ready
    pub fn is_ready(&self, id: AgentId) -> Option<A> {
        let agents = self.lock();
        agents
            .get(&id)
            .filter(|r| r.status == AgentStatus::Ready)
            .and_then(|r| r.agent.clone())
    }

    /// The process handle, if the agent is known and not terminated
    pub fn is_agent_process_active(&self, id: AgentId) -> Option<ProcessHandle> {
        let agents = self.lock();
        agents
            .get(&id)
            .filter(|r| r.status != AgentStatus::Terminated)
            .and_then(|r| r.process.clone())
    }

    /// Record that the agent's process is gone.
    ///
    /// Marking an already terminated agent again is a no-op.
    pub fn mark_terminated(&self, id: AgentId) -> Result<(), StoreError> {
        let mut agents = self.lock();
        let record = agents.remove(&id).ok_or(StoreError::UnknownAgent(id))?;
        agents.insert(id, record.terminated());
        tracing::debug!(agent_id = %id, "Agent terminated");
        Ok(())
    }

    pub fn status(&self, id: AgentId) -> Option<AgentStatus> {
        self.lock().get(&id).map(|r| r.status)
    }

    /// Snapshot of every ready agent
    pub fn ready_agents(&self) -> Vec<(AgentId, A)> {
        self.lock()
            .iter()
            .filter(|(_, r)| r.status == AgentStatus::Ready)
            .filter_map(|(id, r)| r.agent.clone().map(|a| (*id, a)))
            .collect()
    }

    /// Snapshot of every process not yet marked terminated
    pub fn active_processes(&self) -> Vec<(AgentId, ProcessHandle)> {
        self.lock()
            .iter()
            .filter(|(_, r)| r.status != AgentStatus::Terminated)
            .filter_map(|(id, r)| r.process.clone().map(|p| (*id, p)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<A: Clone> Default for AgentStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

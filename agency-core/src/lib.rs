// ABOUTME: Controller side of the agency - launches agents, tracks them and drives them remotely.
// ABOUTME: Agent-side protocol and transport live in agency-agent; this crate builds on them.

pub mod agency;
pub mod config;
pub mod launcher;
pub mod metrics;
pub mod paths;
pub mod proxy;
pub mod runtime;
pub mod store;
pub mod transport;

pub use agency::{Agency, StartError};
pub use config::AgencyConfig;
pub use launcher::{AgentProcess, LaunchError, ProcessHandle};
pub use proxy::{ProxyError, RemoteAgent, RemoteRunner};
pub use runtime::{Runtime, RuntimeFramework};
pub use store::{AgentRecord, AgentStatus, AgentStore, StoreError};
pub use transport::AgencyTransport;

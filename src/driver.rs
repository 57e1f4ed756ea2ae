// ABOUTME: Run driver - gets an agent for a package, loads it, then explores or runs it.
// ABOUTME: The agent is released afterwards whether or not the run succeeded.

use agency_agent::{EngineResult, EventListener, TestFilter, TestPackage};
use agency_core::{Agency, RemoteAgent};
use anyhow::{Context, Result};
use std::sync::Arc;

/// What to do with the loaded package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Explore,
    Run,
}

/// Drive one package through an agent and return the terminal result
pub async fn drive(
    agency: &Agency,
    package: &TestPackage,
    filter: &TestFilter,
    mode: Mode,
    listener: &dyn EventListener,
) -> Result<EngineResult> {
    let agent = agency
        .get_agent(package)
        .await
        .context("Failed to start agent")?;
    let id = agent.id();

    let outcome = exercise(&agent, package, filter, mode, listener).await;
    agency.release_agent(id).await;
    outcome
}

async fn exercise(
    agent: &Arc<RemoteAgent>,
    package: &TestPackage,
    filter: &TestFilter,
    mode: Mode,
    listener: &dyn EventListener,
) -> Result<EngineResult> {
    agent
        .create_runner(package.clone())
        .await
        .context("Failed to create runner")?;
    let loaded = agent.load().await.context("Failed to load package")?;
    tracing::info!(agent_id = %agent.id(), files = loaded.nodes.len(), "Package loaded");

    match mode {
        Mode::Explore => agent.explore(filter).await.context("Explore failed"),
        Mode::Run => agent.run(listener, filter).await.context("Run failed"),
    }
}

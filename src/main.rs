// ABOUTME: Agent entry point launched by the agency with `<id> <agency> --pid=<pid> ...`
// ABOUTME: Changes to the work directory, sets up logging, then serves commands until stopped

use agency::agent;
use agency::cli::AgentArgs;
use agency::logging;
use anyhow::{Context, Result};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = AgentArgs::parse();

    if let Some(work) = &args.work {
        std::env::set_current_dir(work)
            .with_context(|| format!("Failed to change to work directory {}", work.display()))?;
    }

    let log_dir = std::env::current_dir().context("Failed to resolve work directory")?;
    let _log_guard = logging::init_agent(args.effective_trace_level(), &log_dir)?;

    if args.debug_agent {
        tracing::info!(pid = std::process::id(), "Agent started with --debug-agent");
    }

    agent::run_agent(&args).await?;
    Ok(())
}

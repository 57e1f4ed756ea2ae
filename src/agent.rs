// ABOUTME: Agent process body - handshake with the agency, then serve commands until stopped.
// ABOUTME: Also watches the controlling agency's pid so an orphaned agent shuts itself down.

use crate::cli::AgentArgs;
use agency_agent::runners::ProcessRunner;
use agency_agent::{CommandLoop, HandshakeClient, LoopExit, RunnerFactory, StopSignal};
use anyhow::{Context, Result};
use std::time::Duration;

/// How often the controller pid is probed
pub const ORPHAN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// How long an orphaned agent waits for its command loop to wind down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Register with the agency named on the command line and serve it with process runners
pub async fn run_agent(args: &AgentArgs) -> Result<LoopExit> {
    serve(args, ProcessRunner::factory()).await
}

/// Register with the agency and serve commands with runners from `factory`
pub async fn serve(args: &AgentArgs, factory: RunnerFactory) -> Result<LoopExit> {
    tracing::info!(
        agent_id = %args.agent_id,
        agency = %args.connection_point,
        controller_pid = args.pid,
        "Agent starting"
    );

    let channel = HandshakeClient::new(&args.connection_point, args.agent_id)
        .data_connection()
        .await
        .with_context(|| format!("Handshake with agency '{}' failed", args.connection_point))?;
    tracing::info!(agent_id = %args.agent_id, "Connected to agency");

    let stop = StopSignal::new();
    let mut command_loop = tokio::spawn(CommandLoop::new(channel, factory, stop.clone()).run());

    let exit = tokio::select! {
        joined = &mut command_loop => joined.context("Command loop panicked")?,
        _ = controller_gone(args.pid) => {
            tracing::warn!(controller_pid = args.pid, "Agency process is gone, stopping agent");
            stop.cancel();
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut command_loop).await {
                Ok(joined) => joined.context("Command loop panicked")?,
                Err(_) => {
                    command_loop.abort();
                    Ok(LoopExit::Cancelled)
                }
            }
        }
    };

    let exit = exit.context("Agent pipe failed")?;
    tracing::info!(agent_id = %args.agent_id, ?exit, "Agent stopped");
    Ok(exit)
}

/// Resolve once the process `pid` no longer exists
pub async fn controller_gone(pid: u32) {
    let mut ticker = tokio::time::interval(ORPHAN_CHECK_INTERVAL);
    loop {
        ticker.tick().await;
        if !process_alive(pid) {
            return;
        }
    }
}

/// Signal-0 probe; a process we may not signal still counts as alive
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

// ABOUTME: Agent process launcher - turns package settings into an agent command line and starts it.
// ABOUTME: Resolves the agent executable from the install dir by runtime and bit-width, failing fast if missing.

use crate::runtime::{Runtime, RuntimeFramework};
use agency_agent::package::settings;
use agency_agent::{AgentId, TestPackage};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use tokio::process::{Child, Command as ProcessCommand};
use tokio_util::sync::CancellationToken;

/// Base name of the agent executable
pub const AGENT_NAME: &str = "agency-agent";

/// Failures detected before or while starting an agent process
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("invalid runtime setting '{setting}': {reason}")]
    InvalidRuntime { setting: String, reason: String },

    #[error("unsupported runtime: {0}")]
    UnsupportedRuntime(RuntimeFramework),

    #[error("{} could not be found", .0.display())]
    AgentNotFound(PathBuf),

    #[error("failed to start agent {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Shared handle on a launched agent process.
///
/// The process itself is owned by its supervisor task; the handle only
/// identifies it and lets any holder ask for it to be killed.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Arc<OnceLock<u32>>,
    kill: CancellationToken,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>) -> Self {
        let handle = Self::pending();
        if let Some(pid) = pid {
            handle.attach(pid);
        }
        handle
    }

    /// Handle for a process that has not been spawned yet
    pub fn pending() -> Self {
        Self {
            pid: Arc::new(OnceLock::new()),
            kill: CancellationToken::new(),
        }
    }

    /// Record the pid once the process exists; visible through every clone
    pub fn attach(&self, pid: u32) {
        let _ = self.pid.set(pid);
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    /// Ask the supervisor to kill the process
    pub fn kill(&self) {
        self.kill.cancel();
    }

    pub fn kill_requested(&self) -> bool {
        self.kill.is_cancelled()
    }

    /// Token the supervisor waits on
    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }
}

/// A fully resolved agent invocation, not yet started
#[derive(Debug, Clone)]
pub struct AgentProcess {
    target_runtime: RuntimeFramework,
    agent_exe_path: PathBuf,
    agent_args: Vec<String>,
    program: PathBuf,
    program_args: Vec<String>,
}

impl AgentProcess {
    pub fn new(
        install_dir: &Path,
        connection_point: &str,
        package: &TestPackage,
        id: AgentId,
    ) -> Result<Self, LaunchError> {
        let runtime_setting: String = package.get_setting(settings::RUNTIME_FRAMEWORK, String::new());
        let target_runtime =
            RuntimeFramework::parse(&runtime_setting).map_err(|e| LaunchError::InvalidRuntime {
                setting: runtime_setting.clone(),
                reason: e.to_string(),
            })?;

        let run_as_x86 = package.get_setting(settings::RUN_AS_X86, false);
        let debug_tests = package.get_setting(settings::DEBUG_TESTS, false);
        let debug_agent = package.get_setting(settings::DEBUG_AGENT, false);
        let trace_level: String =
            package.get_setting(settings::INTERNAL_TRACE_LEVEL, "Off".to_string());
        let load_user_profile = package.get_setting(settings::LOAD_USER_PROFILE, false);
        let work_directory: String = package.get_setting(settings::WORK_DIRECTORY, String::new());

        let mut agent_args = vec![
            id.to_string(),
            connection_point.to_string(),
            format!("--pid={}", std::process::id()),
        ];
        if !trace_level.eq_ignore_ascii_case("off") {
            agent_args.push(format!("--trace={}", trace_level));
        }
        if debug_agent {
            agent_args.push("--debug-agent".to_string());
        }
        if !work_directory.is_empty() {
            agent_args.push(format!("--work={}", work_directory));
        }

        let agent_exe_path = agent_exe_path(install_dir, &target_runtime, run_as_x86)?;
        tracing::debug!(path = %agent_exe_path.display(), runtime = %target_runtime, "Resolved agent executable");
        if load_user_profile {
            tracing::debug!("LoadUserProfile has no effect on this platform");
        }

        let (program, program_args) = match target_runtime.runtime {
            Runtime::Mono => {
                let mut args = vec![format!("--runtime=v{}", target_runtime.clr_version())];
                if debug_tests || debug_agent {
                    args.push("--debug".to_string());
                }
                args.push(agent_exe_path.display().to_string());
                (PathBuf::from("mono"), args)
            }
            Runtime::NetCore => (
                PathBuf::from("dotnet"),
                vec![agent_exe_path.display().to_string()],
            ),
            Runtime::Net | Runtime::Native => (agent_exe_path.clone(), Vec::new()),
        };

        Ok(Self {
            target_runtime,
            agent_exe_path,
            agent_args,
            program,
            program_args,
        })
    }

    pub fn target_runtime(&self) -> &RuntimeFramework {
        &self.target_runtime
    }

    pub fn agent_exe_path(&self) -> &Path {
        &self.agent_exe_path
    }

    /// Arguments the agent itself receives
    pub fn agent_args(&self) -> &[String] {
        &self.agent_args
    }

    /// Program to execute and its full argument list
    pub fn command_line(&self) -> (&Path, Vec<String>) {
        let args = self
            .program_args
            .iter()
            .chain(self.agent_args.iter())
            .cloned()
            .collect();
        (&self.program, args)
    }

    /// Start the agent; the executable must exist
    pub fn launch(&self) -> Result<Child, LaunchError> {
        if !self.agent_exe_path.is_file() {
            return Err(LaunchError::AgentNotFound(self.agent_exe_path.clone()));
        }

        let (program, args) = self.command_line();
        tracing::info!(runtime = %self.target_runtime, program = %program.display(), "Launching agent");

        ProcessCommand::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                path: program.to_path_buf(),
                source,
            })
    }
}

/// Agent executable for a runtime and bit-width under `install_dir`
pub fn agent_exe_path(
    install_dir: &Path,
    target: &RuntimeFramework,
    requires_32_bit: bool,
) -> Result<PathBuf, LaunchError> {
    let agent_name = if requires_32_bit {
        format!("{}-x86", AGENT_NAME)
    } else {
        AGENT_NAME.to_string()
    };

    let relative = match target.runtime {
        Runtime::Native => PathBuf::from(agent_name),
        Runtime::Net | Runtime::Mono => {
            PathBuf::from("agents/net20").join(format!("{}.exe", agent_name))
        }
        Runtime::NetCore => match target.version.map(|v| v.major) {
            Some(1) => PathBuf::from("agents/netcoreapp1.1").join(format!("{}.dll", agent_name)),
            Some(2) => PathBuf::from("agents/netcoreapp2.1").join(format!("{}.dll", agent_name)),
            _ => return Err(LaunchError::UnsupportedRuntime(*target)),
        },
    };

    Ok(install_dir.join(relative))
}

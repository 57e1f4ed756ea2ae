// ABOUTME: Command lines for the agent process and the run driver
// ABOUTME: The agent's arguments mirror exactly what the launcher passes it

use crate::logging::TraceLevel;
use agency_agent::package::settings;
use agency_agent::{AgentId, TestFilter, TestPackage};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "agency-agent")]
#[command(about = "Test agent process launched and driven by an agency", long_about = None)]
#[command(version)]
pub struct AgentArgs {
    /// Identity assigned by the agency
    pub agent_id: AgentId,

    /// Rendezvous pipe of the agency to register with
    pub connection_point: String,

    /// Process id of the controlling agency; the agent stops when it goes away
    #[arg(long)]
    pub pid: u32,

    /// Trace level for the agent log file
    #[arg(long, default_value_t = TraceLevel::Off)]
    pub trace: TraceLevel,

    /// Log the agent pid and trace at debug level or above
    #[arg(long = "debug-agent")]
    pub debug_agent: bool,

    /// Directory to change to before doing anything else
    #[arg(long)]
    pub work: Option<PathBuf>,
}

impl AgentArgs {
    /// Trace level after `--debug-agent` is taken into account
    pub fn effective_trace_level(&self) -> TraceLevel {
        if self.debug_agent {
            self.trace.max(TraceLevel::Debug)
        } else {
            self.trace
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "agency-run")]
#[command(about = "Run test executables in a separate agent process", long_about = None)]
#[command(version)]
pub struct RunArgs {
    /// Test executables to run
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Filter passed to each test executable
    #[arg(long, default_value = "")]
    pub filter: String,

    /// List the tests instead of running them
    #[arg(long)]
    pub explore: bool,

    /// Trace level for the agent's log file
    #[arg(long)]
    pub trace: Option<TraceLevel>,

    /// Ask the agent to log its pid for a debugger
    #[arg(long = "debug-agent")]
    pub debug_agent: bool,

    /// Working directory for the agent
    #[arg(long)]
    pub work: Option<PathBuf>,

    /// Directory holding the agent executable (overrides config)
    #[arg(long)]
    pub install_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Package describing the requested files and agent settings
    pub fn package(&self) -> TestPackage {
        let mut package = match self.files.as_slice() {
            [single] => TestPackage::new(single),
            files => TestPackage::from_files(files),
        };

        if let Some(trace) = self.trace {
            package.add_setting(settings::INTERNAL_TRACE_LEVEL, trace.to_string());
        }
        if self.debug_agent {
            package.add_setting(settings::DEBUG_AGENT, true);
        }
        if let Some(work) = &self.work {
            package.add_setting(
                settings::WORK_DIRECTORY,
                work.to_string_lossy().into_owned(),
            );
        }
        package
    }

    pub fn filter(&self) -> TestFilter {
        TestFilter::new(self.filter.clone())
    }
}

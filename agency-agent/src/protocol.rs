// ABOUTME: Wire protocol - the closed set of commands the agency sends and replies an agent returns.
// ABOUTME: Every frame body is wrapped in a versioned envelope and encoded as JSON.

use crate::package::{EngineResult, TestFilter, TestPackage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version stamped on every frame; a peer speaking another version is rejected
pub const PROTOCOL_VERSION: u16 = 1;

/// Versioned frame body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub v: u16,
    pub msg: T,
}

impl<T> Envelope<T> {
    pub fn new(msg: T) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            msg,
        }
    }
}

/// Commands sent from the remote proxy to an agent's command loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Bind a local runner for the package; no reply
    CreateRunner { package: TestPackage },
    Load,
    Reload,
    /// No reply
    Unload,
    Explore { filter: TestFilter },
    CountTestCases { filter: TestFilter },
    /// Replies with zero or more events followed by a result
    Run { filter: TestFilter },
    /// Starts a run without waiting; only events follow
    RunAsync { filter: TestFilter },
    /// No reply
    StopRun { force: bool },
    /// Ends the command loop; no reply
    Stop,
}

/// Wire names of every command this build understands
pub const COMMAND_NAMES: &[&str] = &[
    "create_runner",
    "load",
    "reload",
    "unload",
    "explore",
    "count_test_cases",
    "run",
    "run_async",
    "stop_run",
    "stop",
];

impl Command {
    /// Wire name, matching the serialized `command` tag
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateRunner { .. } => "create_runner",
            Command::Load => "load",
            Command::Reload => "reload",
            Command::Unload => "unload",
            Command::Explore { .. } => "explore",
            Command::CountTestCases { .. } => "count_test_cases",
            Command::Run { .. } => "run",
            Command::RunAsync { .. } => "run_async",
            Command::StopRun { .. } => "stop_run",
            Command::Stop => "stop",
        }
    }

    /// Whether the agent answers this command with a terminal reply
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            Command::Load
                | Command::Reload
                | Command::Explore { .. }
                | Command::CountTestCases { .. }
                | Command::Run { .. }
        )
    }
}

/// Frames sent from an agent back to the remote proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    /// Out-of-band progress report, may arrive at any time during a run
    Event { report: String },
    /// Terminal structured result
    Result(EngineResult),
    /// Terminal test case count
    Count { value: usize },
    /// The agent did not understand the named command
    Unrecognized { command: String },
    /// The runner failed, or no runner was bound yet
    Failure { message: String },
}

impl Reply {
    pub fn event(report: impl Into<String>) -> Self {
        Reply::Event {
            report: report.into(),
        }
    }

    pub fn is_event(&self) -> bool {
        matches!(self, Reply::Event { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Event { .. } => "event",
            Reply::Result(_) => "result",
            Reply::Count { .. } => "count",
            Reply::Unrecognized { .. } => "unrecognized",
            Reply::Failure { .. } => "failure",
        }
    }
}

/// A command body as seen by the agent, with unknown opcodes kept visible
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Command(Command),
    Unrecognized(String),
}

/// Decode a command body, separating unknown opcodes from malformed payloads
pub fn decode_command(body: Value) -> Result<Incoming, serde_json::Error> {
    let name = body
        .get("command")
        .and_then(Value::as_str)
        .map(str::to_owned);

    match serde_json::from_value::<Command>(body) {
        Ok(command) => Ok(Incoming::Command(command)),
        Err(e) => match name {
            Some(name) if !COMMAND_NAMES.contains(&name.as_str()) => {
                Ok(Incoming::Unrecognized(name))
            }
            _ => Err(e),
        },
    }
}

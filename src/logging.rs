// ABOUTME: Trace levels and tracing-subscriber setup for both binaries.
// ABOUTME: The agent also writes agent.<pid>.log in its work directory through tracing-appender.

use anyhow::Result;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Agent trace verbosity as carried on the command line and in package settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TraceLevel {
    #[default]
    Off,
    Error,
    Warning,
    Info,
    Debug,
    Verbose,
}

impl TraceLevel {
    pub fn level_filter(self) -> LevelFilter {
        match self {
            TraceLevel::Off => LevelFilter::OFF,
            TraceLevel::Error => LevelFilter::ERROR,
            TraceLevel::Warning => LevelFilter::WARN,
            TraceLevel::Info => LevelFilter::INFO,
            TraceLevel::Debug => LevelFilter::DEBUG,
            TraceLevel::Verbose => LevelFilter::TRACE,
        }
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraceLevel::Off => "Off",
            TraceLevel::Error => "Error",
            TraceLevel::Warning => "Warning",
            TraceLevel::Info => "Info",
            TraceLevel::Debug => "Debug",
            TraceLevel::Verbose => "Verbose",
        };
        f.write_str(name)
    }
}

impl FromStr for TraceLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(TraceLevel::Off),
            "error" => Ok(TraceLevel::Error),
            "warning" => Ok(TraceLevel::Warning),
            "info" => Ok(TraceLevel::Info),
            "debug" => Ok(TraceLevel::Debug),
            "verbose" => Ok(TraceLevel::Verbose),
            _ => anyhow::bail!("Unknown trace level: {}", s),
        }
    }
}

/// Name of the agent's log file for process `pid`
pub fn agent_log_name(pid: u32) -> String {
    format!("agent.{}.log", pid)
}

/// Controller logging: stderr plus a daily log file under `log_dir`, filtered by RUST_LOG or `info`.
///
/// The file layer is skipped when `log_dir` cannot be created.
pub fn init_controller(log_dir: &Path) -> Option<WorkerGuard> {
    let (file, guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, "agency.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("Cannot create log directory {}: {}", log_dir.display(), e);
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file)
        .init();
    guard
}

/// Agent logging.
///
/// Warnings and errors always reach stderr. When `level` is not `Off`, events
/// up to `level` are also written to `agent.<pid>.log` under `log_dir`. The
/// returned guard flushes the file on drop and must outlive the agent.
pub fn init_agent(level: TraceLevel, log_dir: &Path) -> Result<Option<WorkerGuard>> {
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        );

    let (file, guard) = if level == TraceLevel::Off {
        (None, None)
    } else {
        std::fs::create_dir_all(log_dir)?;
        let appender =
            tracing_appender::rolling::never(log_dir, agent_log_name(std::process::id()));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(level.level_filter());
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry().with(stderr).with(file).init();
    Ok(guard)
}

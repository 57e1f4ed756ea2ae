// ABOUTME: Root library behind the agency-agent and agency-run binaries
// ABOUTME: Command lines, logging setup, the agent process body and the run driver

pub mod agent;
pub mod cli;
pub mod driver;
pub mod logging;

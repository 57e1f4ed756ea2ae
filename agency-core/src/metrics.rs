// ABOUTME: Metric helpers for agent lifecycle and pipe traffic.
// ABOUTME: Thin wrappers over the metrics facade; a no-op until the host installs a recorder.

use ::metrics::{counter, gauge};

pub fn record_agent_launched() {
    counter!("agency_agents_launched_total").increment(1);
}

pub fn record_agent_registered() {
    counter!("agency_agents_registered_total").increment(1);
}

pub fn record_agent_terminated() {
    counter!("agency_agents_terminated_total").increment(1);
}

/// An agent killed by the agency rather than exiting on its own
pub fn record_agent_killed(reason: &'static str) {
    counter!("agency_agents_killed_total", "reason" => reason).increment(1);
}

pub fn record_handshake() {
    counter!("agency_handshakes_total").increment(1);
}

pub fn record_frame_written(command: &'static str) {
    counter!("agency_frames_written_total", "command" => command).increment(1);
}

pub fn record_error(kind: &'static str) {
    counter!("agency_errors_total", "kind" => kind).increment(1);
}

pub fn set_ready_agents(count: usize) {
    gauge!("agency_ready_agents").set(count as f64);
}

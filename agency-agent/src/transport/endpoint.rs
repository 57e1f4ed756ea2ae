// ABOUTME: Maps pipe names onto socket paths so both ends resolve a name identically.
// ABOUTME: Directory comes from AGENCY_PIPE_DIR (inherited by agents) or the system temp dir.

use std::path::PathBuf;

/// Environment variable overriding where pipe endpoints live
pub const PIPE_DIR_ENV: &str = "AGENCY_PIPE_DIR";

/// Directory holding every pipe endpoint
pub fn pipe_dir() -> PathBuf {
    std::env::var_os(PIPE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

/// Socket path backing the pipe called `name`
pub fn socket_path(name: &str) -> PathBuf {
    pipe_dir().join(format!("{}.sock", name))
}

/// Name of the `n`th private data pipe handed out from rendezvous `base`
pub fn data_pipe_name(base: &str, n: u64) -> String {
    format!("{}_{}", base, n)
}

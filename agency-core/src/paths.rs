// ABOUTME: XDG Base Directory paths for the agency's config and data.
// ABOUTME: Provides the default config file location and the controller's log directory.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Identifier the agency's XDG directories are derived from
const QUALIFIER: &str = "org";
const ORGANIZATION: &str = "agency";
const APPLICATION: &str = "agency";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Where the agency keeps state between runs, `./data` when there is no home directory
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Controller and agent log files
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Directory searched for `config.toml`, the working directory when there is no home directory
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default agency config, overridden by `AGENCY_CONFIG_PATH`
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

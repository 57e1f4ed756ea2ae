// ABOUTME: Agency configuration parsed from TOML with environment variable overrides.
// ABOUTME: Every field has a default so the agency runs with no config file at all.

use crate::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgencyConfig {
    /// Prefix of the rendezvous pipe name
    #[serde(default = "default_name")]
    pub name: String,
    /// Directory the agent executables are resolved from
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,
    /// How long a launched agent has to complete its handshake
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    /// Kill agents whose outstanding call sees no frame for this long; unset disables the watchdog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_timeout_secs: Option<u64>,
}

fn default_name() -> String {
    "TestAgency".to_string()
}

/// Directory holding the running executable, or the current directory
fn default_install_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_startup_timeout_secs() -> u64 {
    30
}

impl Default for AgencyConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            install_dir: default_install_dir(),
            startup_timeout_secs: default_startup_timeout_secs(),
            liveness_timeout_secs: None,
        }
    }
}

impl AgencyConfig {
    /// Find the config file, checking multiple locations in order:
    /// 1. AGENCY_CONFIG_PATH env var (if set)
    /// 2. ./agency.toml
    /// 3. ~/.config/agency/config.toml
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("AGENCY_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("agency.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration from the first config file found, then apply env overrides
    pub fn load() -> Result<Self> {
        let config = match Self::find_config_file() {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration from file");
                Self::from_file(&path)?
            }
            None => {
                tracing::info!("No config file found, using environment variables and defaults");
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Apply AGENCY_* environment variables on top of this config
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(val) = std::env::var("AGENCY_NAME") {
            self.name = val;
        }
        if let Ok(val) = std::env::var("AGENCY_INSTALL_DIR") {
            self.install_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("AGENCY_STARTUP_TIMEOUT_SECS") {
            self.startup_timeout_secs = val.parse().with_context(|| {
                format!(
                    "AGENCY_STARTUP_TIMEOUT_SECS must be a valid number, got: {}",
                    val
                )
            })?;
        }
        if let Ok(val) = std::env::var("AGENCY_LIVENESS_TIMEOUT_SECS") {
            let secs: u64 = val.parse().with_context(|| {
                format!(
                    "AGENCY_LIVENESS_TIMEOUT_SECS must be a valid number, got: {}",
                    val
                )
            })?;
            // 0 disables the watchdog
            self.liveness_timeout_secs = (secs > 0).then_some(secs);
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("name must not be empty (set in config or AGENCY_NAME env var)");
        }
        if self.name.contains('/') {
            anyhow::bail!("name must not contain '/': {}", self.name);
        }
        if self.startup_timeout_secs == 0 {
            anyhow::bail!("startup_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn liveness_timeout(&self) -> Option<Duration> {
        self.liveness_timeout_secs.map(Duration::from_secs)
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{alog_debug, Error, Result};

fn default_wip_limit() -> usize {
    1
}

fn default_retry_limit() -> u32 {
    3
}

fn default_stall_threshold_secs() -> u64 {
    120
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_activity_tail() -> usize {
    50
}

/// Runtime tunables, loaded from `~/.atelier/atelier.toml`.
///
/// Every field has a default so a missing config file is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Max concurrent in-flight envelopes per agent.
    #[serde(default = "default_wip_limit")]
    pub wip_limit: usize,
    /// Consecutive reasoner failures tolerated before an agent blocks.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// How long an agent may stay blocked with no progress before the
    /// runtime reports it as stalled.
    #[serde(default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,
    /// Grace period for draining in-flight work on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Number of activity-log entries retained for status snapshots.
    #[serde(default = "default_activity_tail")]
    pub activity_tail: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wip_limit: default_wip_limit(),
            retry_limit: default_retry_limit(),
            stall_threshold_secs: default_stall_threshold_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            activity_tail: default_activity_tail(),
        }
    }
}

impl Config {
    pub fn atelier_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".atelier"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::atelier_dir()?.join("atelier.toml"))
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        alog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            alog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        alog_debug!(
            "Config loaded: wip_limit={}, retry_limit={}, stall_threshold={}s",
            config.wip_limit,
            config.retry_limit,
            config.stall_threshold_secs
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::atelier_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        alog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

/// Where orchestration state is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub state_dir: Option<String>,
    pub store: StoreBackend,
    /// The `metadata.to` value that addresses the orchestration core.
    pub orchestrator_name: String,
    pub lock_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: None,
            store: StoreBackend::File,
            orchestrator_name: "orchestrator".to_string(),
            lock_timeout_ms: 5_000,
            poll_interval_ms: 1_000,
            event_capacity: 256,
        }
    }
}

impl Config {
    /// Base directory, `$TASKLOOM_HOME` or `~/.taskloom`.
    pub fn home_dir() -> Result<PathBuf> {
        if let Some(home) = std::env::var_os("TASKLOOM_HOME") {
            return Ok(PathBuf::from(home));
        }
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskloom"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("taskloom.toml"))
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::home_dir()?.join("state")),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.check()?;
        debug!(
            store = ?config.store,
            state_dir = ?config.state_dir,
            lock_timeout_ms = config.lock_timeout_ms,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                debug!(dir = %parent.display(), "creating config directory");
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.orchestrator_name.trim().is_empty() {
            return Err(Error::Validation("orchestrator_name must not be empty".into()));
        }
        if self.lock_timeout_ms == 0 {
            return Err(Error::Validation("lock_timeout_ms must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Validation("poll_interval_ms must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Validation("event_capacity must be positive".into()));
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

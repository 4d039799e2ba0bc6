//! Configuration loader and validator for the offline sync daemon.
use crate::sync::SyncPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub remote: Remote,
    pub sync: Sync,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Period of the background replay tick.
    pub poll_interval_ms: u64,
    /// Period of the reachability probe.
    pub probe_interval_ms: u64,
}

/// Remote store endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remote {
    pub base_url: String,
    pub api_key: String,
    /// Session token; falls back to the api key when absent.
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Replay policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sync {
    /// Failed submissions before a movement is dead-lettered; 0 retries
    /// forever.
    pub max_attempts: u32,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            max_attempts: (self.sync.max_attempts > 0).then_some(self.sync.max_attempts),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.probe_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.probe_interval_ms must be > 0"));
    }

    if cfg.remote.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.base_url must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.remote.base_url).is_err() {
        return Err(ConfigError::Invalid("remote.base_url must be a valid URL"));
    }
    if cfg.remote.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.api_key must be non-empty"));
    }

    Ok(())
}

/// Example configuration shipped with the daemon.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 30000
  probe_interval_ms: 10000

remote:
  base_url: "https://YOUR_PROJECT.supabase.co/"
  api_key: "YOUR_ANON_KEY"
  # access_token: "USER_SESSION_TOKEN"

sync:
  max_attempts: 10
"#
}

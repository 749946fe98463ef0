//! Client configuration.
//!
//! Read from `config.toml` in the topolab home directory (`~/.topolab`, or
//! `$TOPOLAB_HOME`). Every field has a default, so a missing file or a
//! partial file is fine. `TOPOLAB_API_URL` overrides the API base URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_API_URL;
use crate::error::{ClientError, Result};
use crate::models::{ChatMode, Model};
use crate::poller::PollTiming;

/// Environment variable overriding the topolab home directory.
pub const HOME_ENV: &str = "TOPOLAB_HOME";

/// Environment variable overriding the API base URL.
pub const API_URL_ENV: &str = "TOPOLAB_API_URL";

const CONFIG_FILE: &str = "config.toml";

/// Task polling timings, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub initial_delay_ms: u64,
    pub interval_ms: u64,
    pub completed_grace_ms: u64,
    pub failed_grace_ms: u64,
    /// Upper bound on status requests per task. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_polls: Option<u32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollTiming::default().into()
    }
}

impl From<PollTiming> for PollConfig {
    fn from(timing: PollTiming) -> Self {
        Self {
            initial_delay_ms: millis(timing.initial_delay),
            interval_ms: millis(timing.interval),
            completed_grace_ms: millis(timing.completed_grace),
            failed_grace_ms: millis(timing.failed_grace),
            max_polls: timing.max_polls,
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl PollConfig {
    pub fn timing(&self) -> PollTiming {
        PollTiming {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            interval: Duration::from_millis(self.interval_ms),
            completed_grace: Duration::from_millis(self.completed_grace_ms),
            failed_grace: Duration::from_millis(self.failed_grace_ms),
            max_polls: self.max_polls,
        }
    }
}

/// User configuration for the topolab client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the API, including the version prefix.
    pub base_url: String,

    /// Model for new sessions.
    pub model: Model,

    /// Mode for new sessions.
    pub mode: ChatMode,

    /// Seconds to wait for a connection to be established.
    pub connect_timeout_secs: u64,

    /// Total request timeout in seconds. Unset means no limit, which suits
    /// long agent responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    pub poll: PollConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            model: Model::default(),
            mode: ChatMode::default(),
            connect_timeout_secs: 5,
            request_timeout_secs: None,
            poll: PollConfig::default(),
        }
    }
}

impl ClientConfig {
    /// The topolab home directory.
    pub fn home_dir() -> Option<PathBuf> {
        match std::env::var(HOME_ENV) {
            Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
            _ => dirs::home_dir().map(|h| h.join(".topolab")),
        }
    }

    /// Path of the config file in the home directory.
    pub fn default_path() -> Option<PathBuf> {
        Self::home_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from the standard location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path().filter(|p| p.exists()) {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ClientError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&content).map_err(|e| ClientError::Config {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Parse config from TOML text.
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `TOPOLAB_API_URL` if set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV)
            && !url.is_empty()
        {
            tracing::debug!(url = %url, "Using API URL from environment");
            self.base_url = url;
        }
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<PathBuf> {
        let dir = Self::home_dir().ok_or_else(|| ClientError::Config {
            message: "No home directory".to_string(),
        })?;
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self).map_err(|e| ClientError::Config {
            message: e.to_string(),
        })?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

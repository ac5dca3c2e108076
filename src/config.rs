//! Settings file (`config.toml` in the config dir)
//!
//! Every field is optional. CLI flags override what is loaded here.

use anyhow::{Context, Result};
use iamkit::RetryConfig;
use iamkit::secret::{DEFAULT_PASSWORD_LENGTH, MIN_PASSWORD_LENGTH};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

/// Settings file name inside the config dir
pub const SETTINGS_FILE: &str = "config.toml";

/// Default desired-state file name inside the config dir
pub const DEFAULT_DESIRED_FILE: &str = "desired.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// AWS CLI profile
    pub profile: Option<String>,
    /// AWS region
    pub region: Option<String>,
    /// Desired-state file; relative paths resolve against the config dir
    pub desired_state: Option<String>,
    /// Worker-pool bound for reads and apply stages
    pub jobs: usize,
    pub retry: RetrySettings,
    /// Generated console password length
    pub password_length: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: None,
            region: None,
            desired_state: None,
            jobs: 4,
            retry: RetrySettings::default(),
            password_length: DEFAULT_PASSWORD_LENGTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

impl RetrySettings {
    pub fn to_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Overrides taken from global CLI flags
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub profile: Option<String>,
    pub region: Option<String>,
    pub file: Option<PathBuf>,
    pub jobs: Option<usize>,
}

impl Settings {
    /// Path of the settings file
    pub fn path() -> Result<PathBuf> {
        Ok(paths::config_dir()?.join(SETTINGS_FILE))
    }

    /// Load settings, or defaults if the file doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Settings file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;

        log::debug!("Loaded settings from {}", path.display());
        Ok(settings.normalized())
    }

    /// Apply CLI overrides on top of loaded settings
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if overrides.profile.is_some() {
            self.profile = overrides.profile;
        }
        if overrides.region.is_some() {
            self.region = overrides.region;
        }
        if let Some(file) = overrides.file {
            self.desired_state = Some(file.display().to_string());
        }
        if let Some(jobs) = overrides.jobs {
            self.jobs = jobs;
        }
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        self.jobs = self.jobs.max(1);
        self.retry.max_attempts = self.retry.max_attempts.max(1);
        if self.password_length < MIN_PASSWORD_LENGTH {
            log::warn!(
                "password_length {} is below the minimum; using {MIN_PASSWORD_LENGTH}",
                self.password_length
            );
            self.password_length = MIN_PASSWORD_LENGTH;
        }
        self
    }

    /// Resolved desired-state file path
    pub fn desired_state_path(&self) -> Result<PathBuf> {
        let config_dir = paths::config_dir()?;
        Ok(match &self.desired_state {
            Some(raw) => {
                let path = paths::expand(raw);
                if path.is_relative() {
                    config_dir.join(path)
                } else {
                    path
                }
            }
            None => config_dir.join(DEFAULT_DESIRED_FILE),
        })
    }
}

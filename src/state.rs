//! Persisted state (`state.toml` in the state dir)
//!
//! Only tracked entity keys, the last plan fingerprint and a timestamp are
//! stored. Secrets never reach this file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use iamkit::{EntityKey, TrackedKeys};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamsyncState {
    /// Entities iamsync manages
    #[serde(default)]
    pub tracked: TrackedKeys,

    /// Fingerprint of the last plan that was applied
    #[serde(default)]
    pub last_fingerprint: Option<String>,

    /// Last time the state was updated
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl IamsyncState {
    /// Get the state file path
    pub fn state_file() -> Result<PathBuf> {
        Ok(paths::state_dir()?.join("state.toml"))
    }

    /// Load state from disk, or return default if file doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file does not exist, using default state");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded state from {}", path.display());
        Ok(state)
    }

    /// Save state to disk
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize state to TOML")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    /// Record newly managed entities. Returns how many were new.
    pub fn track<'a>(&mut self, keys: impl IntoIterator<Item = &'a EntityKey>) -> usize {
        keys.into_iter().filter(|k| self.tracked.insert(k)).count()
    }

    /// Update the fingerprint and timestamp
    pub fn touch(&mut self, fingerprint: Option<String>) {
        if fingerprint.is_some() {
            self.last_fingerprint = fingerprint;
        }
        self.last_updated = Some(Utc::now());
    }
}

//! Engine configuration

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

use crate::error::SyncError;

/// Environment variable overriding [`SyncConfig::max_concurrent_upserts`]
pub const ENV_MAX_CONCURRENCY: &str = "PLAYBOOK_SYNC_MAX_CONCURRENCY";
/// Environment variable overriding [`SyncConfig::delete_orphans`]
pub const ENV_DELETE_ORPHANS: &str = "PLAYBOOK_SYNC_DELETE_ORPHANS";

/// Tuning knobs for one sync orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Store calls allowed in flight during the upsert and link passes.
    /// `1` processes nodes strictly one after another.
    #[serde(default = "default_max_concurrent_upserts")]
    pub max_concurrent_upserts: usize,

    /// Delete records no live canvas node owns
    #[serde(default = "default_delete_orphans")]
    pub delete_orphans: bool,
}

fn default_max_concurrent_upserts() -> usize {
    4
}

fn default_delete_orphans() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_upserts: default_max_concurrent_upserts(),
            delete_orphans: default_delete_orphans(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_CONCURRENCY) {
            match raw.trim().parse::<usize>() {
                Ok(value) if value > 0 => config.max_concurrent_upserts = value,
                _ => warn!("Invalid {} value: {}", ENV_MAX_CONCURRENCY, raw),
            }
        }

        if let Some(raw) = lookup(ENV_DELETE_ORPHANS) {
            match raw.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => config.delete_orphans = true,
                "false" | "0" | "no" => config.delete_orphans = false,
                _ => warn!("Invalid {} value: {}", ENV_DELETE_ORPHANS, raw),
            }
        }

        config
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.max_concurrent_upserts == 0 {
            return Err(SyncError::Configuration(
                "max_concurrent_upserts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder-style override of the concurrency limit
    pub fn with_max_concurrent_upserts(mut self, value: usize) -> Self {
        self.max_concurrent_upserts = value;
        self
    }

    /// Builder-style override of orphan deletion
    pub fn with_delete_orphans(mut self, enabled: bool) -> Self {
        self.delete_orphans = enabled;
        self
    }
}

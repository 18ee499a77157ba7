//! Engine configuration.
//!
//! `SyncConfig` carries the recognized tuning options and the per-resource-type
//! conflict policy overrides. It can be built in code or loaded from a JSON
//! file; every field has a default so partial files are accepted.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::ResolutionStrategy;

const DEFAULT_MAX_RETRY_COUNT: u32 = 5;
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_SYNC_INTERVAL_MS: u64 = 30_000;
const DEFAULT_QUEUE_DRAIN_INTERVAL_MS: u64 = 5_000;

/// Tuning options for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Failed deliveries tolerated before a queue item is marked failed
    pub max_retry_count: u32,
    /// Page size for pending-resource listings and outbound responses
    pub batch_size: usize,
    /// Period of the full-sync request timer
    pub sync_interval_ms: u64,
    /// Period of the offline queue drain timer
    pub queue_drain_interval_ms: u64,
    /// Per-resource-type overrides of the built-in policy table
    pub conflict_policies: BTreeMap<String, ResolutionStrategy>,
    /// Strategy for resource types absent from the table
    pub default_strategy: ResolutionStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            batch_size: DEFAULT_BATCH_SIZE,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            queue_drain_interval_ms: DEFAULT_QUEUE_DRAIN_INTERVAL_MS,
            conflict_policies: BTreeMap::new(),
            default_strategy: ResolutionStrategy::Manual,
        }
    }
}

impl SyncConfig {
    /// Load and validate a JSON config file; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::Config(format!("Failed to parse config at {}: {error}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than zero".into()));
        }
        if self.sync_interval_ms == 0 {
            return Err(Error::Config(
                "sync_interval_ms must be greater than zero".into(),
            ));
        }
        if self.queue_drain_interval_ms == 0 {
            return Err(Error::Config(
                "queue_drain_interval_ms must be greater than zero".into(),
            ));
        }
        if self.conflict_policies.keys().any(|key| key.trim().is_empty()) {
            return Err(Error::Config(
                "conflict_policies keys must not be empty".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    #[must_use]
    pub const fn queue_drain_interval(&self) -> Duration {
        Duration::from_millis(self.queue_drain_interval_ms)
    }

    /// Set the retry ceiling
    #[must_use]
    pub const fn with_max_retry_count(mut self, max_retry_count: u32) -> Self {
        self.max_retry_count = max_retry_count;
        self
    }

    /// Set the page size
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set both timer periods
    #[must_use]
    pub const fn with_intervals(mut self, sync: Duration, queue_drain: Duration) -> Self {
        self.sync_interval_ms = duration_millis(sync);
        self.queue_drain_interval_ms = duration_millis(queue_drain);
        self
    }

    /// Override the strategy for one resource type
    #[must_use]
    pub fn with_policy(
        mut self,
        resource_type: impl Into<String>,
        strategy: ResolutionStrategy,
    ) -> Self {
        self.conflict_policies.insert(resource_type.into(), strategy);
        self
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn duration_millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

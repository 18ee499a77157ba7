//! Per-organization sync statistics

use serde::{Deserialize, Serialize};

/// Counts reported by `SyncStateStore::stats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Sync-state rows for the org
    pub total: usize,
    pub synced: usize,
    pub pending: usize,
    pub conflict: usize,
    /// Pending offline-queue rows
    pub queue_size: usize,
    /// Queue rows whose retries are exhausted
    pub failed_queue_items: usize,
    pub unresolved_conflicts: usize,
}

//! Data models for peersync

mod conflict;
mod queue_item;
mod stats;
mod sync_state;

pub use conflict::{ConflictId, ConflictRecord, ResolutionStrategy};
pub use queue_item::{QueueAction, QueueItem, QueueItemId, QueueStatus};
pub use stats::SyncStats;
pub use sync_state::{SyncState, SyncStatePatch, SyncStatus};

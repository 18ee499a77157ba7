//! peersync-core - Peer-to-peer resource synchronization
//!
//! Keeps structured records consistent across the peers of an organization
//! without a central server: vector clocks for causal ordering, a durable
//! offline queue for outbound changes, per-resource-type conflict policies,
//! and the [`SyncEngine`] that speaks the peer protocol.

pub mod clock;
pub mod config;
pub mod db;
pub mod detector;
pub mod engine;
pub mod error;
pub mod models;
pub mod peer;
pub mod policy;
pub mod protocol;
pub mod queue;
pub mod resolver;
pub mod util;

#[cfg(test)]
mod testing;

pub use clock::{ClockOrdering, VectorClock};
pub use config::SyncConfig;
pub use detector::{detect, Detection, Side};
pub use engine::{AutoSyncHandle, ManualResolution, MessageOutcome, SyncContext, SyncEngine};
pub use error::{Error, Result};
pub use models::{
    ConflictId, ConflictRecord, QueueAction, QueueItem, QueueItemId, QueueStatus,
    ResolutionStrategy, SyncState, SyncStatePatch, SyncStats, SyncStatus,
};
pub use peer::{Identity, RecordStore, Transport};
pub use policy::ConflictPolicy;
pub use protocol::SyncMessage;
pub use queue::OfflineQueue;
pub use resolver::ConflictResolver;

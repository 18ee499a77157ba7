//! Database layer for peersync

mod columns;
mod conflict_repository;
mod connection;
mod migrations;
mod queue_repository;
mod state_repository;

pub use conflict_repository::{ConflictRepository, Resolution, SqliteConflictRepository};
pub use connection::Database;
pub use queue_repository::{QueueRepository, SqliteQueueRepository};
pub use state_repository::{SqliteSyncStateRepository, SyncStateRepository};

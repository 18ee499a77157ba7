pub mod common;
pub mod config;
pub mod conflicts;
pub mod pending;
pub mod queue;
pub mod stats;

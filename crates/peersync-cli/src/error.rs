use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] peersync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Organization ID cannot be empty")]
    EmptyOrgId,
    #[error("Invalid queue item ID: {0}")]
    InvalidQueueItemId(String),
    #[error("Queue item {0} is not failed; only failed items can be requeued")]
    NotRequeueable(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

//! Error types for peersync-core

use thiserror::Error;

/// Result type alias using peersync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in peersync-core operations
///
/// Concurrent edits are not errors: they surface as conflict records and
/// message outcomes. Only malformed input and I/O failures end up here.
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Inbound change whose signature did not verify; nothing was mutated
    #[error("Invalid signature on {resource_type}/{resource_id} from {author}")]
    SignatureInvalid {
        resource_type: String,
        resource_id: String,
        author: String,
    },

    /// Identity provider failure (signing or verification could not run)
    #[error("Identity error: {0}")]
    Identity(String),

    /// Transport failure
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Underlying record store failure
    #[error("Record store error: {0}")]
    RecordStore(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

//! Error types for the ingestion pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while ingesting, exporting, or resending events.
///
/// A store observed closed mid-operation is not an error; operations report
/// it through their outcome types instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure to reach the stream source or establish a subscription.
    #[error("Connection error: {0}")]
    Connect(String),

    /// RocksDB error.
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// The store was closed but a handle clone still holds its database.
    #[error("Store at '{}' is still held by a closed handle", .0.display())]
    StoreInUse(PathBuf),

    /// Record encode/decode error.
    #[error("Codec error: {0}")]
    Codec(#[from] hubvault_core::Error),

    /// I/O error without a specific path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error on a specific file or directory.
    #[error("Failed to {action} '{}': {source}", .path.display())]
    File {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Remote send failure.
    #[error("Transmission error: {0}")]
    Transmission(String),

    /// JSON error on the gateway wire or in the config file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel send error.
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// A background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Wrap an I/O error with the action and path that produced it.
    pub fn file(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            action,
            path: path.into(),
            source,
        }
    }
}

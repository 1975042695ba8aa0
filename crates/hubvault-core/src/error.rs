//! Error types for the hubvault record model.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding, decoding, or rendering records.
#[derive(Error, Debug)]
pub enum Error {
    /// Stored bytes do not decode to a record.
    #[error("corrupt record: {0}")]
    CorruptRecord(#[from] rmp_serde::decode::Error),

    /// The encoder failed to produce bytes for a record.
    #[error("record encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

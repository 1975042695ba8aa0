//! Binary encoding of [`Record`]s for storage.
//!
//! Records are stored as MessagePack maps keyed by field name, which keeps
//! the encoding deterministic for a given record and tolerant of field
//! reordering in future versions.

use crate::error::Result;
use crate::record::Record;

/// Encode a record into its stored byte form.
pub fn encode(record: &Record) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(record)?)
}

/// Decode stored bytes back into a record.
///
/// Returns [`Error::CorruptRecord`](crate::Error::CorruptRecord) if the bytes
/// are not a valid encoding.
pub fn decode(bytes: &[u8]) -> Result<Record> {
    Ok(rmp_serde::from_slice(bytes)?)
}

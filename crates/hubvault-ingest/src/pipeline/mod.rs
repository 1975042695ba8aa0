//! Core pipeline components shared by the read and export operations.
//!
//! - [`PersistenceWorker`] - Deduplicating writer draining the ingestion queue
//! - [`FileMaterializer`] - Writes records to date-partitioned dump files
//! - [`ExportEngine`] - Replays the store through the materializer
//!
//! # Architecture
//!
//! ```text
//! [EventHub] → [IngestionConsumer] → queue → [PersistenceWorker] → RocksDB
//!                                                    ↓ (read-to-file)
//!                                             [FileMaterializer]
//!
//! RocksDB → [ExportEngine] → [FileMaterializer] → <dump_dir>/<date>/<file>
//! ```
//!
//! The store is the source of truth; dump files are derived and can always be
//! regenerated with an export.

mod export;
mod materialize;
mod persist;

pub use export::{ExportEngine, ExportStats};
pub use materialize::{DumpMode, FileMaterializer, MaterializerConfig};
pub use persist::{PersistStats, PersistenceWorker, WorkerExit, WorkerReport};

use hubvault_core::Record;
use tokio::sync::mpsc;

/// Create the bounded queue between the consumer and the persistence worker.
///
/// A full queue makes the consumer wait, which in turn slows delivery.
pub fn queue(capacity: usize) -> (mpsc::Sender<Record>, mpsc::Receiver<Record>) {
    mpsc::channel(capacity.max(1))
}

//! Hubvault ingestion pipeline components.
//!
//! This crate ingests events from a partitioned event hub into a durable,
//! deduplicated local store, replays the store into dump files, and resends
//! queued files back to the hub.
//!
//! # Modules
//!
//! - [`source`] - Event hub abstraction, adapters, and the ingestion consumer
//! - [`pipeline`] - Persistence worker, file materializer, export engine
//! - [`store`] - RocksDB-backed record store with explicit liveness
//! - [`outbound`] - Resending queued files
//! - [`app`] - The `read`, `export2file`, and `write` operations
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    EventHub     │  (TCP gateway, in-process hub)
//! └────────┬────────┘
//!          │ at-least-once delivery
//!          ▼
//! ┌─────────────────┐
//! │IngestionConsumer│  Builds records, applies backpressure
//! └────────┬────────┘
//!          │ bounded queue
//!          ▼
//! ┌─────────────────┐
//! │PersistenceWorker│  Check-then-insert by event id
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │      Store      │  RocksDB, source of truth
//! └────────┬────────┘
//!          │ export2file
//!          ▼
//! ┌─────────────────┐
//! │FileMaterializer │  <dump_dir>/<date>/<timestamp>--<id>.txt
//! └─────────────────┘
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod outbound;
pub mod pipeline;
pub mod shutdown;
pub mod source;
pub mod store;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use config::{Config, Operation};
pub use outbound::{OutboundConfig, OutboundSender, SendReport};
pub use pipeline::{
    DumpMode, ExportEngine, ExportStats, FileMaterializer, MaterializerConfig, PersistenceWorker,
    WorkerExit, WorkerReport,
};
pub use shutdown::Shutdown;
pub use source::{
    ConnectionString, DeliveryHandler, EventHub, InboundEvent, IngestionConsumer, MemoryHub,
    ReceiveStats, TcpHub,
};
pub use store::{Insert, Store, StoreConfig, StoreHandle};

//! Deduplicating persistence worker.
//!
//! Drains the ingestion queue in FIFO order. Each record is stored under its
//! id at most once: the existence check, the elapsed-time stamp, the optional
//! dump, and the commit all happen inside one store transaction. A redelivered
//! event is acknowledged as a duplicate and leaves the stored entry untouched.

use crate::error::Result;
use crate::pipeline::FileMaterializer;
use crate::store::{Insert, StoreHandle};
use chrono::Utc;
use hubvault_core::{Record, encode, metrics};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Why the worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Every sender was dropped and the queue was drained.
    QueueClosed,
    /// The store was closed underneath the worker.
    StoreClosed,
}

/// Final counters of a finished worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub exit: WorkerExit,
    pub persisted: u64,
    pub duplicates: u64,
}

/// Live counters shared between the worker and its owner.
#[derive(Debug, Default)]
pub struct PersistStats {
    persisted: AtomicU64,
    duplicates: AtomicU64,
}

impl PersistStats {
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }
}

/// Persists queued records into the store.
pub struct PersistenceWorker {
    handle: StoreHandle,
    materializer: Option<Arc<FileMaterializer>>,
    stats: Arc<PersistStats>,
}

impl PersistenceWorker {
    /// Create a worker. With a materializer every new record is also dumped
    /// to disk before it is committed.
    pub fn new(handle: StoreHandle, materializer: Option<Arc<FileMaterializer>>) -> Self {
        Self {
            handle,
            materializer,
            stats: Arc::new(PersistStats::default()),
        }
    }

    /// Shared counters, readable while the worker runs.
    pub fn stats(&self) -> Arc<PersistStats> {
        Arc::clone(&self.stats)
    }

    /// Persist one record unless its id is already stored.
    pub fn persist(&self, mut record: Record) -> Result<Insert> {
        let key = record.id.clone();
        let materializer = self.materializer.as_deref();

        let outcome = self.handle.insert_if_absent(key.as_bytes(), || {
            record.mark_elapsed(Utc::now());
            if let Some(materializer) = materializer {
                materializer.materialize(&record)?;
            }
            Ok(encode(&record)?)
        })?;

        match outcome {
            Insert::Inserted => {
                self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                metrics::increment(metrics::INGEST_EVENTS_PERSISTED, 1);
                debug!("Persisted event {}", key);
            }
            Insert::Duplicate => {
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                metrics::increment(metrics::INGEST_EVENTS_DUPLICATE, 1);
                debug!("Skipping duplicate event {}", key);
            }
            Insert::StoreClosed => {}
        }

        Ok(outcome)
    }

    /// Drain the queue on the current thread until it closes, the store
    /// closes, or persisting a record fails.
    ///
    /// Blocks; call from a blocking context.
    pub fn run(self, mut queue: mpsc::Receiver<Record>) -> Result<WorkerReport> {
        info!("Persistence worker started");

        let exit = loop {
            let Some(record) = queue.blocking_recv() else {
                break WorkerExit::QueueClosed;
            };

            if !self.handle.is_live() {
                break WorkerExit::StoreClosed;
            }

            if self.persist(record)? == Insert::StoreClosed {
                break WorkerExit::StoreClosed;
            }
        };

        let report = WorkerReport {
            exit,
            persisted: self.stats.persisted(),
            duplicates: self.stats.duplicates(),
        };
        match exit {
            WorkerExit::QueueClosed => info!(
                "Persistence worker finished: {} persisted, {} duplicates",
                report.persisted, report.duplicates
            ),
            WorkerExit::StoreClosed => info!(
                "Store closed. Persistence worker stopping after {} persisted, {} duplicates",
                report.persisted, report.duplicates
            ),
        }
        Ok(report)
    }

    /// Run the worker on tokio's blocking pool.
    pub fn spawn(self, queue: mpsc::Receiver<Record>) -> JoinHandle<Result<WorkerReport>> {
        tokio::task::spawn_blocking(move || self.run(queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DumpMode, MaterializerConfig};
    use crate::store::{Store, StoreConfig};
    use chrono::TimeZone;
    use hubvault_core::decode;
    use tempfile::TempDir;

    fn test_store(tmp: &TempDir) -> Store {
        Store::new(StoreConfig {
            base_dir: tmp.path().to_path_buf(),
            data_dir: tmp.path().join("data"),
            wal_dir: tmp.path().join("wal"),
            ..Default::default()
        })
    }

    fn record(id: &str, payload: &str, second: u32) -> Record {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, second).unwrap();
        Record::received(id, at, None, None, payload.as_bytes().to_vec(), at)
    }

    #[test]
    fn test_redelivery_keeps_first_entry() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp);
        let worker = PersistenceWorker::new(store.open().unwrap(), None);

        let first = record("e1", "hello", 0);
        let again = record("e1", "hello", 30);

        assert_eq!(worker.persist(first.clone()).unwrap(), Insert::Inserted);
        assert_eq!(worker.persist(again).unwrap(), Insert::Duplicate);

        let stored = decode(&store.open().unwrap().get(b"e1").unwrap().unwrap()).unwrap();
        assert_eq!(stored.processed_at, first.processed_at);
        assert_eq!(stored.payload, b"hello");
        assert!(!stored.elapsed_time.is_empty());
        assert_eq!(worker.stats().persisted(), 1);
        assert_eq!(worker.stats().duplicates(), 1);
    }

    #[test]
    fn test_read_to_file_dumps_only_new_records() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp);
        let materializer = Arc::new(FileMaterializer::new(MaterializerConfig {
            dump_dir: tmp.path().join("dump"),
            mode: DumpMode::PayloadOnly,
        }));
        let worker = PersistenceWorker::new(store.open().unwrap(), Some(Arc::clone(&materializer)));

        let first = record("e1", "hello", 0);
        worker.persist(first.clone()).unwrap();
        worker.persist(record("e1", "hello", 9)).unwrap();

        assert_eq!(materializer.files_written(), 1);
        let path = materializer.path_for(&first);
        assert_eq!(std::fs::read(path).unwrap(), b"hello");
    }

    #[test]
    fn test_failed_dump_is_not_committed() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp);
        // A file where the dump root should be makes every dump fail
        let blocked = tmp.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();
        let materializer = Arc::new(FileMaterializer::new(MaterializerConfig {
            dump_dir: blocked,
            mode: DumpMode::Report,
        }));
        let worker = PersistenceWorker::new(store.open().unwrap(), Some(materializer));

        assert!(worker.persist(record("e1", "x", 0)).is_err());
        assert_eq!(store.open().unwrap().get(b"e1").unwrap(), None);
    }

    #[test]
    fn test_run_drains_queue_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp);
        let worker = PersistenceWorker::new(store.open().unwrap(), None);

        let (tx, rx) = mpsc::channel(8);
        for (i, id) in ["b", "a", "b", "c"].into_iter().enumerate() {
            tx.blocking_send(record(id, id, i as u32)).unwrap();
        }
        drop(tx);

        let report = worker.run(rx).unwrap();
        assert_eq!(report.exit, WorkerExit::QueueClosed);
        assert_eq!(report.persisted, 3);
        assert_eq!(report.duplicates, 1);

        // The first "b" wins
        let stored = decode(&store.open().unwrap().get(b"b").unwrap().unwrap()).unwrap();
        assert_eq!(stored.processed_at.timestamp() % 60, 0);
    }

    #[test]
    fn test_run_stops_when_store_closes() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp);
        let worker = PersistenceWorker::new(store.open().unwrap(), None);
        store.close().unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.blocking_send(record("e1", "x", 0)).unwrap();

        let report = worker.run(rx).unwrap();
        assert_eq!(report.exit, WorkerExit::StoreClosed);
        assert_eq!(report.persisted, 0);
    }

    #[tokio::test]
    async fn test_spawned_worker() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp);
        let worker = PersistenceWorker::new(store.open().unwrap(), None);
        let stats = worker.stats();

        let (tx, rx) = mpsc::channel(2);
        let task = worker.spawn(rx);
        for i in 0..5 {
            tx.send(record(&format!("e{i}"), "x", i)).await.unwrap();
        }
        drop(tx);

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.persisted, 5);
        assert_eq!(stats.persisted(), 5);
    }
}

//! Replay of the durable store into dump files.
//!
//! Every stored record is decoded and written to its date-partitioned dump
//! path unless a file already exists there, so re-running an export only
//! fills in what is missing. Records are visited in ascending key order over
//! a snapshot; a shutdown request or a closed store stops the scan early.

use crate::error::Result;
use crate::pipeline::FileMaterializer;
use crate::shutdown::Shutdown;
use crate::store::{ScanEnd, StoreHandle};
use hubvault_core::{decode, metrics};
use tracing::{debug, info};

/// Counters for one export run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// Records read from the store.
    pub visited: u64,
    /// Dump files written.
    pub written: u64,
    /// Records whose dump file already existed.
    pub skipped: u64,
    /// The scan stopped before reaching the end of the store.
    pub interrupted: bool,
}

/// Exports stored records through a [`FileMaterializer`].
pub struct ExportEngine {
    handle: StoreHandle,
    materializer: FileMaterializer,
    progress_interval: u64,
}

impl ExportEngine {
    pub fn new(handle: StoreHandle, materializer: FileMaterializer, progress_interval: u64) -> Self {
        Self {
            handle,
            materializer,
            progress_interval: progress_interval.max(1),
        }
    }

    /// Export every record not yet on disk. Blocks.
    ///
    /// An undecodable record or a failed write aborts the export.
    pub fn run(&self, shutdown: &Shutdown) -> Result<ExportStats> {
        let mut stats = ExportStats::default();
        info!(
            "Exporting records to {}",
            self.materializer.config().dump_dir.display()
        );

        let summary = self.handle.scan(|_key, value| {
            if shutdown.is_triggered() {
                return Ok(false);
            }

            let record = decode(value)?;
            let path = self.materializer.path_for(&record);

            // An unreadable path counts as present
            if path.try_exists().unwrap_or(true) {
                stats.skipped += 1;
                metrics::increment(metrics::EXPORT_RECORDS_SKIPPED, 1);
                debug!("Dump for {} already exists, skipping", record.id);
            } else {
                let path = self.materializer.prepare(&record)?;
                self.materializer.dump(&record, &path)?;
                stats.written += 1;
                metrics::increment(metrics::EXPORT_RECORDS_WRITTEN, 1);
            }

            let done = stats.written + stats.skipped;
            if done % self.progress_interval == 0 {
                info!(
                    "Export progress: {} records ({} written, {} skipped)",
                    done, stats.written, stats.skipped
                );
            }
            Ok(true)
        })?;

        stats.visited = stats.written + stats.skipped;
        stats.interrupted = summary.end != ScanEnd::Exhausted;

        if stats.interrupted {
            info!(
                "Export interrupted after {} records ({} written, {} skipped)",
                stats.visited, stats.written, stats.skipped
            );
        } else {
            info!(
                "Export complete: {} records ({} written, {} skipped)",
                stats.visited, stats.written, stats.skipped
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DumpMode, MaterializerConfig};
    use crate::store::{Store, StoreConfig};
    use chrono::{TimeZone, Utc};
    use hubvault_core::{Record, encode};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        store: Store,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let store = Store::new(StoreConfig {
                base_dir: tmp.path().to_path_buf(),
                data_dir: tmp.path().join("data"),
                wal_dir: tmp.path().join("wal"),
                ..Default::default()
            });
            Self { tmp, store }
        }

        fn seed(&self, records: &[Record]) {
            let handle = self.store.open().unwrap();
            for record in records {
                handle
                    .insert_if_absent(record.key(), || Ok(encode(record)?))
                    .unwrap();
            }
        }

        fn engine(&self, mode: DumpMode) -> ExportEngine {
            let materializer = FileMaterializer::new(MaterializerConfig {
                dump_dir: self.tmp.path().join("dump"),
                mode,
            });
            ExportEngine::new(self.store.open().unwrap(), materializer, 1000)
        }
    }

    fn record(id: &str, day: u32) -> Record {
        let at = Utc.with_ymd_and_hms(2024, 6, day, 10, 0, 0).unwrap();
        Record::received(id, at, Some(day as i64), None, id.as_bytes().to_vec(), at)
    }

    #[test]
    fn test_export_writes_partitioned_files() {
        let fx = Fixture::new();
        let a = record("a", 1);
        let b = record("b", 2);
        fx.seed(&[a.clone(), b.clone()]);

        let engine = fx.engine(DumpMode::PayloadOnly);
        let stats = engine.run(&Shutdown::new()).unwrap();

        assert_eq!(stats.visited, 2);
        assert_eq!(stats.written, 2);
        assert_eq!(stats.skipped, 0);
        assert!(!stats.interrupted);

        let dump = fx.tmp.path().join("dump");
        assert_eq!(fs::read(dump.join("2024-06-01").join(&a.dump_filename)).unwrap(), b"a");
        assert_eq!(fs::read(dump.join("2024-06-02").join(&b.dump_filename)).unwrap(), b"b");
    }

    #[test]
    fn test_second_export_skips_everything() {
        let fx = Fixture::new();
        fx.seed(&[record("a", 1), record("b", 1)]);
        let engine = fx.engine(DumpMode::Report);

        engine.run(&Shutdown::new()).unwrap();
        let again = engine.run(&Shutdown::new()).unwrap();

        assert_eq!(again.written, 0);
        assert_eq!(again.skipped, 2);
    }

    #[test]
    fn test_existing_file_is_not_overwritten() {
        let fx = Fixture::new();
        let a = record("a", 3);
        fx.seed(&[a.clone()]);
        let engine = fx.engine(DumpMode::Report);

        let dir = fx.tmp.path().join("dump").join("2024-06-03");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(&a.dump_filename), b"edited by hand").unwrap();

        let stats = engine.run(&Shutdown::new()).unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(fs::read(dir.join(&a.dump_filename)).unwrap(), b"edited by hand");
    }

    #[test]
    fn test_shutdown_interrupts_export() {
        let fx = Fixture::new();
        fx.seed(&[record("a", 1), record("b", 1)]);
        let engine = fx.engine(DumpMode::Report);

        let shutdown = Shutdown::new();
        shutdown.trigger();
        let stats = engine.run(&shutdown).unwrap();

        assert!(stats.interrupted);
        assert_eq!(stats.written, 0);
    }

    #[test]
    fn test_closed_store_interrupts_export() {
        let fx = Fixture::new();
        fx.seed(&[record("a", 1)]);
        let engine = fx.engine(DumpMode::Report);
        fx.store.close().unwrap();

        let stats = engine.run(&Shutdown::new()).unwrap();
        assert!(stats.interrupted);
        assert_eq!(stats.visited, 0);
    }

    #[test]
    fn test_corrupt_record_aborts_export() {
        let fx = Fixture::new();
        let handle = fx.store.open().unwrap();
        handle
            .insert_if_absent(b"bad", || Ok(vec![0xc1, 0x00]))
            .unwrap();

        let err = fx.engine(DumpMode::Report).run(&Shutdown::new()).unwrap_err();
        assert!(matches!(err, crate::Error::Codec(_)));
    }

    #[test]
    fn test_empty_store() {
        let fx = Fixture::new();
        let stats = fx.engine(DumpMode::Report).run(&Shutdown::new()).unwrap();
        assert_eq!(stats, ExportStats::default());
    }
}

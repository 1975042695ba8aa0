//! File materializer for record dumps.
//!
//! Writes one file per record under a date-partitioned directory:
//!
//! ```text
//! <dump_dir>/<YYYY-MM-DD>/<YYYY-MM-DDTHH-MM-SS.cc>--<id>.txt
//! ```
//!
//! The partition is the record's `processed_at` date. Each file holds either
//! the raw payload or the multi-field report, depending on [`DumpMode`].

use crate::error::{Error, Result};
use hubvault_core::Record;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// What a dump file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpMode {
    /// Metadata header followed by the payload.
    #[default]
    Report,
    /// The payload bytes only.
    PayloadOnly,
}

/// Configuration for the materializer.
#[derive(Debug, Clone)]
pub struct MaterializerConfig {
    /// Root directory for dumps.
    pub dump_dir: PathBuf,

    /// Dump content.
    pub mode: DumpMode,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from("./.data-dump/eventhub"),
            mode: DumpMode::Report,
        }
    }
}

/// Writes records to dump files.
///
/// Thread-safe: holds no per-file state.
pub struct FileMaterializer {
    config: MaterializerConfig,
    files_written: AtomicUsize,
}

impl FileMaterializer {
    /// Create a new materializer.
    pub fn new(config: MaterializerConfig) -> Self {
        Self {
            config,
            files_written: AtomicUsize::new(0),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &MaterializerConfig {
        &self.config
    }

    /// Directory holding dumps for the record's processing date.
    pub fn partition_dir(&self, record: &Record) -> PathBuf {
        self.config.dump_dir.join(record.partition())
    }

    /// Full dump path for a record.
    pub fn path_for(&self, record: &Record) -> PathBuf {
        self.partition_dir(record).join(&record.dump_filename)
    }

    /// Create the record's partition directory if needed and return the dump path.
    pub fn prepare(&self, record: &Record) -> Result<PathBuf> {
        let dir = self.partition_dir(record);
        fs::create_dir_all(&dir).map_err(|e| Error::file("create directory", &dir, e))?;
        Ok(dir.join(&record.dump_filename))
    }

    /// Prepare the partition and dump the record to its path.
    pub fn materialize(&self, record: &Record) -> Result<PathBuf> {
        let path = self.prepare(record)?;
        self.dump(record, &path)?;
        Ok(path)
    }

    /// Write the record to `path`. The parent directory must already exist.
    ///
    /// The file is flushed and synced to stable storage before returning;
    /// the handle is closed on every exit path.
    pub fn dump(&self, record: &Record, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::file("create file", path, e))?;
        let mut writer = BufWriter::new(file);

        let written = match self.config.mode {
            DumpMode::PayloadOnly => writer.write_all(&record.payload),
            DumpMode::Report => writer.write_all(record.to_report().as_bytes()),
        };
        written.map_err(|e| Error::file("write to file", path, e))?;

        let file = writer
            .into_inner()
            .map_err(|e| Error::file("flush file", path, e.into_error()))?;
        file.sync_all()
            .map_err(|e| Error::file("flush file to disk", path, e))?;

        self.files_written.fetch_add(1, Ordering::Relaxed);
        debug!("Dumped record {} to {}", record.id, path.display());
        Ok(())
    }

    /// Number of dump files written by this materializer.
    pub fn files_written(&self) -> usize {
        self.files_written.load(Ordering::Relaxed)
    }
}

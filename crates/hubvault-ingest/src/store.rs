//! Durable record store using RocksDB.
//!
//! This module provides the [`Store`], which owns the lazily-opened database
//! handle, and [`StoreHandle`], the cheap clonable handle every pipeline
//! stage uses to read and write records.
//!
//! # Key Design
//!
//! - Keys: event ids (raw UTF-8 bytes)
//! - Values: codec-encoded [`Record`](hubvault_core::Record)s
//! - Entries are created once and never updated or deleted
//!
//! # Transactions
//!
//! The store is single-process and single-writer. Write transactions
//! ([`StoreHandle::update`]) hold the handle's writer lock for their whole
//! duration and commit a `WriteBatch` atomically, so a check-then-set inside
//! one transaction can never interleave with another writer. Reads for
//! export run over a snapshot.
//!
//! # Liveness
//!
//! Shutdown may close the store while other stages are mid-operation. Every
//! access checks [`StoreHandle::is_live`] first and reports a closed store
//! through its outcome instead of failing. The RocksDB instance itself is
//! released only when the last handle clone drops, so a concurrent close
//! never frees the database under a running transaction. Until then the
//! database lock stays held and [`Store::open`] refuses to reopen it.

use parking_lot::{Mutex, MutexGuard};
use rocksdb::{
    DBWithThreadMode, IteratorMode, LogLevel, MultiThreaded, Options, WriteBatch, WriteOptions,
};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::error::{Error, Result};

type Db = DBWithThreadMode<MultiThreaded>;

/// Default size of a value-log (blob) file: 10 MiB.
pub const DEFAULT_VALUE_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Configuration for the durable store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base directory; RocksDB's informational logs are written here.
    pub base_dir: PathBuf,

    /// Directory holding the database files.
    pub data_dir: PathBuf,

    /// Directory holding the write-ahead log.
    pub wal_dir: PathBuf,

    /// Emit RocksDB informational logging instead of errors only.
    pub verbose: bool,

    /// Size of each value-log (blob) file in bytes.
    pub value_log_file_size: u64,

    /// Skip the full compaction normally run when the store is closed.
    pub skip_compaction_on_close: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./.appdata"),
            data_dir: PathBuf::from("./.appdata/dir"),
            wal_dir: PathBuf::from("./.appdata/valueDir"),
            verbose: false,
            value_log_file_size: DEFAULT_VALUE_LOG_FILE_SIZE,
            skip_compaction_on_close: false,
        }
    }
}

impl StoreConfig {
    fn rocksdb_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_wal_dir(&self.wal_dir);
        opts.set_db_log_dir(&self.base_dir);
        opts.set_log_level(if self.verbose {
            LogLevel::Info
        } else {
            LogLevel::Error
        });

        // Payloads live in blob files, keeping the LSM tree small
        opts.set_enable_blob_files(true);
        opts.set_blob_file_size(self.value_log_file_size);

        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts
    }
}

/// Owner of the process's store handle.
///
/// [`Store::open`] opens the database on first use and returns the cached
/// handle afterwards; once closed, the next `open` reopens it.
pub struct Store {
    config: StoreConfig,
    current: Mutex<Option<StoreHandle>>,
    /// Database of the last closed handle, alive while any clone remains.
    released: Mutex<Weak<Db>>,
}

impl Store {
    /// Create a store owner; nothing is opened until [`Store::open`].
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            current: Mutex::new(None),
            released: Mutex::new(Weak::new()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Return a live handle, opening the database if needed.
    ///
    /// Reopening after [`Store::close`] requires every clone of the closed
    /// handle to be dropped first; otherwise this fails with
    /// [`Error::StoreInUse`].
    pub fn open(&self) -> Result<StoreHandle> {
        let mut current = self.current.lock();
        if let Some(handle) = current.as_ref()
            && handle.is_live()
        {
            return Ok(handle.clone());
        }

        if self.released.lock().strong_count() > 0 {
            return Err(Error::StoreInUse(self.config.data_dir.clone()));
        }

        let handle = StoreHandle::open(&self.config)?;
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// Close the store. Closing a closed or never-opened store is a no-op.
    pub fn close(&self) -> Result<()> {
        let handle = self.current.lock().take();
        match handle {
            Some(handle) => {
                *self.released.lock() = Arc::downgrade(&handle.db);
                handle.close(self.config.skip_compaction_on_close)
            }
            None => Ok(()),
        }
    }

    /// Whether a live handle is currently cached.
    pub fn is_live(&self) -> bool {
        is_live(self.current.lock().as_ref())
    }
}

/// Liveness check for an optional handle: `false` for `None` or a closed handle.
pub fn is_live(handle: Option<&StoreHandle>) -> bool {
    handle.is_some_and(StoreHandle::is_live)
}

/// Result of [`StoreHandle::insert_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// The key was new and the value is committed.
    Inserted,
    /// The key already existed; nothing was written.
    Duplicate,
    /// The store was closed before the write could happen.
    StoreClosed,
}

/// How a [`StoreHandle::scan`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// Every entry was visited.
    Exhausted,
    /// The visitor asked to stop.
    Stopped,
    /// The store was closed mid-scan.
    StoreClosed,
}

/// Summary of a [`StoreHandle::scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    /// Entries handed to the visitor.
    pub visited: u64,
    /// Why the scan ended.
    pub end: ScanEnd,
}

/// Shared handle to an open store.
///
/// Thread-safe: clones share the database, the writer lock, and the
/// closed flag.
#[derive(Clone)]
pub struct StoreHandle {
    db: Arc<Db>,
    writer: Arc<Mutex<()>>,
    closed: Arc<AtomicBool>,
}

impl StoreHandle {
    fn open(config: &StoreConfig) -> Result<Self> {
        info!(
            "Opening store at {} (wal: {})",
            config.data_dir.display(),
            config.wal_dir.display()
        );

        let db = Db::open(&config.rocksdb_options(), &config.data_dir)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Whether the handle is still usable. Check immediately before every access.
    pub fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn close(&self, skip_compaction: bool) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Wait for an in-flight transaction to finish before flushing
        let _writer = self.writer.lock();
        self.db.flush()?;
        if !skip_compaction {
            debug!("Compacting store before close");
            self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
        }
        info!("Store closed");
        Ok(())
    }

    /// Run a write transaction.
    ///
    /// The closure stages writes on the [`WriteTxn`]; they are committed
    /// atomically if it returns `Ok` and discarded otherwise. Returns
    /// `Ok(None)` without running the closure if the store is closed.
    pub fn update<T, F>(&self, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<T>,
    {
        if !self.is_live() {
            return Ok(None);
        }

        let guard = self.writer.lock();
        // Close may have won the race for the lock
        if !self.is_live() {
            return Ok(None);
        }

        let mut txn = WriteTxn {
            handle: self,
            _guard: guard,
            batch: WriteBatch::default(),
        };
        let value = f(&mut txn)?;
        txn.commit()?;
        Ok(Some(value))
    }

    /// Store `key -> value()` unless the key already exists.
    ///
    /// `value` runs inside the transaction, after the existence check and
    /// before the commit, and only for new keys.
    pub fn insert_if_absent<F>(&self, key: &[u8], value: F) -> Result<Insert>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let outcome = self.update(|txn| {
            if txn.get(key)?.is_some() {
                return Ok(Insert::Duplicate);
            }
            if !txn.is_live() {
                return Ok(Insert::StoreClosed);
            }
            txn.put(key, value()?);
            Ok(Insert::Inserted)
        })?;
        Ok(outcome.unwrap_or(Insert::StoreClosed))
    }

    /// Read a value. Returns `None` if the key is absent or the store is closed.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.is_live() {
            return Ok(None);
        }
        Ok(self.db.get(key)?)
    }

    /// Visit every entry in ascending key order over a consistent snapshot.
    ///
    /// The visitor returns `Ok(true)` to continue and `Ok(false)` to stop.
    /// Liveness is checked before each entry.
    pub fn scan<F>(&self, mut visit: F) -> Result<ScanSummary>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let mut visited = 0u64;
        if !self.is_live() {
            return Ok(ScanSummary {
                visited,
                end: ScanEnd::StoreClosed,
            });
        }

        let snapshot = self.db.snapshot();
        for item in snapshot.iterator(IteratorMode::Start) {
            if !self.is_live() {
                return Ok(ScanSummary {
                    visited,
                    end: ScanEnd::StoreClosed,
                });
            }

            let (key, value) = item?;
            visited += 1;
            if !visit(&key, &value)? {
                return Ok(ScanSummary {
                    visited,
                    end: ScanEnd::Stopped,
                });
            }
        }

        Ok(ScanSummary {
            visited,
            end: ScanEnd::Exhausted,
        })
    }

    /// Count entries by scanning the store.
    pub fn count(&self) -> Result<u64> {
        Ok(self.scan(|_, _| Ok(true))?.visited)
    }
}

/// A write transaction holding the store's writer lock.
pub struct WriteTxn<'a> {
    handle: &'a StoreHandle,
    _guard: MutexGuard<'a, ()>,
    batch: WriteBatch,
}

impl WriteTxn<'_> {
    /// Read the committed value for a key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.handle.db.get(key)?)
    }

    /// Whether the store is still live.
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Stage a write.
    pub fn put(&mut self, key: &[u8], value: Vec<u8>) {
        self.batch.put(key, value);
    }

    fn commit(self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.handle.db.write_opt(self.batch, &write_opts)?;
        Ok(())
    }
}

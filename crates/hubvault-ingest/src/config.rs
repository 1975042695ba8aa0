//! Run configuration loaded from a JSON file.
//!
//! The file uses camelCase keys. Keys from the earlier Badger-based tool
//! (`badgerBase`, `badgerDir`, `eventhubConnString`, ...) are accepted as
//! aliases so existing config files keep working.
//!
//! Required:
//! - `env`, `entityPath`
//! - `consumerGroup` (for `read` only)
//!
//! Everything else has a default, resolved relative to the application
//! directory (the directory holding the executable).

use crate::error::{Error, Result};
use crate::outbound::OutboundConfig;
use crate::pipeline::{DumpMode, MaterializerConfig};
use crate::store::{DEFAULT_VALUE_LOG_FILE_SIZE, StoreConfig};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file looked up in the application directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "default.conf.json";

const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_SEND_CONCURRENCY: usize = 8;
const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;
const DEFAULT_PARTITION: &str = "0";

/// The operation selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Continuously ingest events until interrupted.
    Read,
    /// Export every stored record to dump files.
    Export,
    /// Send queued outbound files.
    Write,
}

impl Operation {
    /// The verb used on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Export => "export2file",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Config file contents as written by the operator.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawConfig {
    env: String,
    entity_path: String,
    consumer_group: String,
    #[serde(alias = "eventhubConnString")]
    connection_string: String,
    partition_id: Option<String>,

    #[serde(alias = "badgerBase")]
    store_base: Option<PathBuf>,
    #[serde(alias = "badgerDir")]
    store_dir: Option<PathBuf>,
    #[serde(alias = "badgerValueDir")]
    store_wal_dir: Option<PathBuf>,
    #[serde(alias = "badgerValueLogFileSize")]
    value_log_file_size: u64,
    #[serde(alias = "badgerSkipCompactL0OnClose")]
    skip_compaction_on_close: bool,
    #[serde(alias = "badgerVerbose")]
    verbose: bool,

    message_dump_dir: Option<PathBuf>,
    read_to_file: bool,
    dump_only_message_data: bool,

    outbound_folder: Option<PathBuf>,
    outbound_folder_sent: Option<PathBuf>,
    dont_move_sent_files: bool,

    queue_capacity: Option<usize>,
    send_concurrency: Option<usize>,
    progress_interval: Option<u64>,
    metrics_port: u16,
}

/// Resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment name; partitions the store directories.
    pub env: String,

    /// Stream entity (hub) name.
    pub entity_path: String,

    /// Consumer group used when reading. Empty for other operations.
    pub consumer_group: String,

    /// Stream connection string as configured.
    pub connection_string: String,

    /// Partition to receive from.
    pub partition_id: String,

    /// Durable store settings.
    pub store: StoreConfig,

    /// Dump settings for `export2file` and read-to-file.
    pub materializer: MaterializerConfig,

    /// Dump each record while reading.
    pub read_to_file: bool,

    /// Outbound sender settings.
    pub outbound: OutboundConfig,

    /// Capacity of the ingestion queue.
    pub queue_capacity: usize,

    /// Log progress every N items.
    pub progress_interval: u64,

    /// Prometheus port (0 disables the endpoint).
    pub metrics_port: u16,
}

impl Config {
    /// Load and validate the config file for `op`.
    pub fn load(path: &Path, op: Operation, app_dir: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "file '{}' does not exist or is inaccessible",
                path.display()
            )));
        }

        let contents =
            fs::read_to_string(path).map_err(|e| Error::file("read config file", path, e))?;
        Self::from_json(&contents, op, app_dir).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!(
                "configuration file '{}' is invalid: {}",
                path.display(),
                msg
            )),
            other => other,
        })
    }

    /// Parse config JSON, fill in defaults, and validate it for `op`.
    pub fn from_json(json: &str, op: Operation, app_dir: &Path) -> Result<Self> {
        let raw: RawConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        Self::resolve(raw, op, app_dir)
    }

    fn resolve(raw: RawConfig, op: Operation, app_dir: &Path) -> Result<Self> {
        if raw.env.is_empty() {
            return Err(Error::Config("key 'env' is missing or empty".to_string()));
        }
        if raw.entity_path.is_empty() {
            return Err(Error::Config(
                "key 'entityPath' is missing or empty".to_string(),
            ));
        }
        if raw.consumer_group.is_empty() && op == Operation::Read {
            return Err(Error::Config(
                "key 'consumerGroup' is missing; a consumer group is required to read"
                    .to_string(),
            ));
        }

        let base = app_dir.join(".appdata");
        let store = StoreConfig {
            data_dir: raw
                .store_dir
                .unwrap_or_else(|| base.join("dir").join(&raw.env)),
            wal_dir: raw
                .store_wal_dir
                .unwrap_or_else(|| base.join("valueDir").join(&raw.env)),
            base_dir: raw.store_base.unwrap_or(base),
            verbose: raw.verbose,
            value_log_file_size: match raw.value_log_file_size {
                0 => DEFAULT_VALUE_LOG_FILE_SIZE,
                size => size,
            },
            skip_compaction_on_close: raw.skip_compaction_on_close,
        };

        let materializer = MaterializerConfig {
            dump_dir: raw
                .message_dump_dir
                .unwrap_or_else(|| app_dir.join(".data-dump").join("eventhub")),
            mode: if raw.dump_only_message_data {
                DumpMode::PayloadOnly
            } else {
                DumpMode::Report
            },
        };

        let outbound_dir = raw
            .outbound_folder
            .unwrap_or_else(|| app_dir.join(".outbound"));
        let outbound = OutboundConfig {
            sent_dir: raw
                .outbound_folder_sent
                .unwrap_or_else(|| app_dir.join(".outbound").join(".sent")),
            outbound_dir,
            leave_sent_files: raw.dont_move_sent_files,
            concurrency: raw
                .send_concurrency
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_SEND_CONCURRENCY),
        };

        let config = Self {
            env: raw.env,
            entity_path: raw.entity_path,
            consumer_group: raw.consumer_group,
            connection_string: raw.connection_string,
            partition_id: raw
                .partition_id
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_PARTITION.to_string()),
            store,
            materializer,
            read_to_file: raw.read_to_file,
            outbound,
            queue_capacity: raw
                .queue_capacity
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
            progress_interval: raw
                .progress_interval
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_PROGRESS_INTERVAL),
            metrics_port: raw.metrics_port,
        };

        tracing::debug!(
            env = %config.env,
            entity_path = %config.entity_path,
            data_dir = %config.store.data_dir.display(),
            "configuration loaded"
        );

        Ok(config)
    }

    /// Create the directories `op` needs.
    pub fn prepare_dirs(&self, op: Operation) -> Result<()> {
        ensure_dir(&self.store.base_dir)?;
        ensure_dir(&self.store.data_dir)?;
        ensure_dir(&self.store.wal_dir)?;

        if op == Operation::Export || (op == Operation::Read && self.read_to_file) {
            ensure_dir(&self.materializer.dump_dir)?;
        }

        if op == Operation::Write {
            ensure_dir(&self.outbound.outbound_dir)?;
            ensure_dir(&self.outbound.sent_dir)?;
        }

        Ok(())
    }
}

/// Directory holding the running executable.
pub fn app_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| Error::file("create path", path, e))
}

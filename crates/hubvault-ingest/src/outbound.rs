//! Outbound sender: pushes queued files to the hub.
//!
//! Every regular file directly inside the outbound directory is sent as one
//! event. After a successful send the file is moved to the sent directory as
//! `<YYYY-MM-DDTHH-MM-SS.cc>--<name>`, unless moving is disabled. Files are
//! processed with bounded concurrency and a failure on one file does not
//! stop the others. Once shutdown is requested no new file is started;
//! sends already in flight are allowed to finish.

use crate::error::{Error, Result};
use crate::shutdown::Shutdown;
use crate::source::EventHub;
use chrono::Utc;
use futures::future;
use futures::stream::{self, StreamExt};
use hubvault_core::{file_timestamp, metrics};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Configuration for the outbound sender.
#[derive(Debug, Clone)]
pub struct OutboundConfig {
    /// Directory scanned for files to send.
    pub outbound_dir: PathBuf,

    /// Directory sent files are moved into.
    pub sent_dir: PathBuf,

    /// Leave sent files where they are.
    pub leave_sent_files: bool,

    /// Maximum number of files in flight.
    pub concurrency: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            outbound_dir: PathBuf::from("./.outbound"),
            sent_dir: PathBuf::from("./.outbound/.sent"),
            leave_sent_files: false,
            concurrency: 8,
        }
    }
}

/// A file that was sent.
#[derive(Debug)]
pub struct SentFile {
    pub path: PathBuf,
    /// Where the file was moved, if it was.
    pub moved_to: Option<PathBuf>,
}

/// A file that failed to send or to move.
#[derive(Debug)]
pub struct FailedFile {
    pub path: PathBuf,
    pub error: Error,
}

/// Outcome of one outbound run.
#[derive(Debug, Default)]
pub struct SendReport {
    pub sent: Vec<SentFile>,
    pub failed: Vec<FailedFile>,
    /// Files left untouched because shutdown was requested.
    pub not_started: usize,
}

impl SendReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn interrupted(&self) -> bool {
        self.not_started > 0
    }
}

/// Sends outbound files through an [`EventHub`].
pub struct OutboundSender {
    config: OutboundConfig,
    hub: Arc<dyn EventHub>,
}

impl OutboundSender {
    pub fn new(config: OutboundConfig, hub: Arc<dyn EventHub>) -> Self {
        Self { config, hub }
    }

    pub fn config(&self) -> &OutboundConfig {
        &self.config
    }

    /// Regular files directly inside the outbound directory, sorted by path.
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.outbound_dir;
        let entries = fs::read_dir(dir).map_err(|e| Error::file("read directory", dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::file("read directory", dir, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| Error::file("inspect", entry.path(), e))?;
            if file_type.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Send every pending file and report per-file outcomes.
    ///
    /// Only failing to list the outbound directory is an error.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<SendReport> {
        let files = self.list_files()?;
        let total = files.len();
        info!(
            "Sending {} files from {} to {}",
            files.len(),
            self.config.outbound_dir.display(),
            self.hub.entity_path()
        );

        let outcomes: Vec<(PathBuf, Result<Option<PathBuf>>)> = stream::iter(files)
            .take_while(|_| future::ready(!shutdown.is_triggered()))
            .map(|path| async move {
                let outcome = self.send_file(&path).await;
                (path, outcome)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = SendReport {
            not_started: total - outcomes.len(),
            ..Default::default()
        };
        for (path, outcome) in outcomes {
            match outcome {
                Ok(moved_to) => {
                    metrics::increment(metrics::OUTBOUND_FILES_SENT, 1);
                    report.sent.push(SentFile { path, moved_to });
                }
                Err(error) => {
                    metrics::increment(metrics::OUTBOUND_FILES_FAILED, 1);
                    error!("[ERROR] Failed to send '{}'. Details: {}", path.display(), error);
                    report.failed.push(FailedFile { path, error });
                }
            }
        }
        report.sent.sort_by(|a, b| a.path.cmp(&b.path));
        report.failed.sort_by(|a, b| a.path.cmp(&b.path));

        if report.interrupted() {
            info!(
                "Outbound interrupted: {} sent, {} failed, {} not started",
                report.sent.len(),
                report.failed.len(),
                report.not_started
            );
        } else {
            info!(
                "Outbound finished: {} sent, {} failed",
                report.sent.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }

    /// Send one file, then move it unless moving is disabled.
    async fn send_file(&self, path: &Path) -> Result<Option<PathBuf>> {
        let payload = tokio::fs::read(path)
            .await
            .map_err(|e| Error::file("read file", path, e))?;
        self.hub.send(payload).await?;
        info!("Sent {}", path.display());

        if self.config.leave_sent_files {
            return Ok(None);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest = self
            .config
            .sent_dir
            .join(format!("{}--{}", file_timestamp(Utc::now()), name));
        tokio::fs::rename(path, &dest)
            .await
            .map_err(|e| Error::file("move file", path, e))?;
        Ok(Some(dest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryHub;
    use tempfile::TempDir;

    fn setup(leave_sent_files: bool) -> (TempDir, OutboundConfig) {
        let tmp = TempDir::new().unwrap();
        let config = OutboundConfig {
            outbound_dir: tmp.path().join("out"),
            sent_dir: tmp.path().join("out").join(".sent"),
            leave_sent_files,
            concurrency: 4,
        };
        fs::create_dir_all(&config.sent_dir).unwrap();
        (tmp, config)
    }

    #[tokio::test]
    async fn test_sends_and_moves_files() {
        let (_tmp, config) = setup(false);
        fs::write(config.outbound_dir.join("a.txt"), b"A").unwrap();
        fs::write(config.outbound_dir.join("b.txt"), b"B").unwrap();

        let hub = MemoryHub::new("eh1");
        let sender = OutboundSender::new(config.clone(), Arc::new(hub.clone()));
        let report = sender.run(&Shutdown::new()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.sent.len(), 2);

        let mut sent = hub.sent();
        sent.sort();
        assert_eq!(sent, vec![b"A".to_vec(), b"B".to_vec()]);

        assert!(sender.list_files().unwrap().is_empty());
        let mut moved: Vec<String> = fs::read_dir(&config.sent_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        moved.sort();
        assert_eq!(moved.len(), 2);
        assert!(moved[0].ends_with("--a.txt"));
        assert!(moved[1].ends_with("--b.txt"));
    }

    #[tokio::test]
    async fn test_leave_sent_files() {
        let (_tmp, config) = setup(true);
        fs::write(config.outbound_dir.join("a.txt"), b"A").unwrap();

        let hub = MemoryHub::new("eh1");
        let sender = OutboundSender::new(config.clone(), Arc::new(hub.clone()));
        let report = sender.run(&Shutdown::new()).await.unwrap();

        assert_eq!(report.sent[0].moved_to, None);
        assert!(config.outbound_dir.join("a.txt").exists());
        assert_eq!(hub.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_file_and_continues() {
        let (_tmp, config) = setup(false);
        fs::write(config.outbound_dir.join("a.txt"), b"A").unwrap();
        fs::write(config.outbound_dir.join("b.txt"), b"B").unwrap();

        let hub = MemoryHub::new("eh1");
        hub.reject(b"A".to_vec());
        let sender = OutboundSender::new(config.clone(), Arc::new(hub.clone()));
        let report = sender.run(&Shutdown::new()).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, config.outbound_dir.join("a.txt"));
        assert!(matches!(report.failed[0].error, Error::Transmission(_)));
        assert_eq!(report.sent.len(), 1);
        assert!(config.outbound_dir.join("a.txt").exists());
        assert!(!config.outbound_dir.join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_sent_dir_reports_move_failure() {
        let (_tmp, mut config) = setup(false);
        config.sent_dir = config.outbound_dir.join("missing");
        fs::write(config.outbound_dir.join("a.txt"), b"A").unwrap();

        let hub = MemoryHub::new("eh1");
        let sender = OutboundSender::new(config, Arc::new(hub.clone()));
        let report = sender.run(&Shutdown::new()).await.unwrap();

        // Sent, but could not be moved
        assert_eq!(hub.sent().len(), 1);
        assert!(matches!(
            report.failed[0].error,
            Error::File { action: "move file", .. }
        ));
    }

    #[tokio::test]
    async fn test_shutdown_stops_new_sends() {
        let (_tmp, config) = setup(false);
        fs::write(config.outbound_dir.join("a.txt"), b"A").unwrap();
        fs::write(config.outbound_dir.join("b.txt"), b"B").unwrap();

        let shutdown = Shutdown::new();
        shutdown.trigger();
        let hub = MemoryHub::new("eh1");
        let sender = OutboundSender::new(config.clone(), Arc::new(hub.clone()));
        let report = sender.run(&shutdown).await.unwrap();

        assert!(report.interrupted());
        assert!(report.is_success());
        assert_eq!(report.not_started, 2);
        assert!(report.sent.is_empty());
        assert!(hub.sent().is_empty());
        assert_eq!(sender.list_files().unwrap().len(), 2);
    }

    #[test]
    fn test_list_skips_directories() {
        let (_tmp, config) = setup(false);
        fs::write(config.outbound_dir.join("z.txt"), b"").unwrap();
        fs::write(config.outbound_dir.join("m.txt"), b"").unwrap();

        let sender = OutboundSender::new(config.clone(), Arc::new(MemoryHub::new("eh1")));
        let files = sender.list_files().unwrap();
        assert_eq!(
            files,
            vec![config.outbound_dir.join("m.txt"), config.outbound_dir.join("z.txt")]
        );
    }

    #[test]
    fn test_missing_outbound_dir_is_error() {
        let tmp = TempDir::new().unwrap();
        let config = OutboundConfig {
            outbound_dir: tmp.path().join("nope"),
            ..Default::default()
        };
        let sender = OutboundSender::new(config, Arc::new(MemoryHub::new("eh1")));
        assert!(sender.list_files().is_err());
    }
}

//! Top-level operations: `read`, `export2file`, and `write`.
//!
//! Each operation wires the pipeline pieces together for one run. The
//! binary picks the operation, connects to the hub, and reports the result;
//! everything here can also be driven directly, e.g. with a [`MemoryHub`].
//!
//! [`MemoryHub`]: crate::source::MemoryHub

use crate::config::Config;
use crate::error::Result;
use crate::outbound::{OutboundSender, SendReport};
use crate::pipeline::{
    self, ExportEngine, ExportStats, FileMaterializer, PersistenceWorker, WorkerExit,
    WorkerReport,
};
use crate::shutdown::Shutdown;
use crate::source::{EventHub, IngestionConsumer, ReceiveStats};
use crate::store::{ScanEnd, Store};
use hubvault_core::metrics;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

/// How a read run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// The hub ended the stream and the queue was drained.
    SourceEnded,
    /// Shutdown was requested.
    Interrupted,
    /// The store was closed underneath the worker.
    StoreClosed,
}

/// Summary of a read run.
#[derive(Debug, Clone, Copy)]
pub struct ReadSummary {
    pub end: ReadEnd,
    pub received: u64,
    pub persisted: u64,
    pub duplicates: u64,
}

enum Race {
    Source(Result<ReceiveStats>),
    Interrupted,
    Worker(std::result::Result<Result<WorkerReport>, tokio::task::JoinError>),
}

/// Ingest events from `hub` into the store until the stream ends or
/// shutdown is requested.
///
/// On shutdown the store is closed first; records still queued at that
/// point are not persisted and will be redelivered on the next run.
pub async fn run_read(
    config: &Config,
    store: &Store,
    hub: Arc<dyn EventHub>,
    shutdown: &Shutdown,
) -> Result<ReadSummary> {
    let handle = store.open()?;

    let materializer = if config.read_to_file {
        warn_read_to_file();
        Some(Arc::new(FileMaterializer::new(config.materializer.clone())))
    } else {
        None
    };

    let (queue, receiver) = pipeline::queue(config.queue_capacity);
    let worker = PersistenceWorker::new(handle, materializer);
    let mut worker_task = worker.spawn(receiver);
    let consumer = IngestionConsumer::new(queue, config.progress_interval);
    let received = consumer.received();

    info!(
        "Reading from {} via {} (partition {}, consumer group {})",
        hub.entity_path(),
        hub.name(),
        config.partition_id,
        config.consumer_group
    );
    metrics::set_gauge(metrics::INGEST_RUNNING, 1.0);

    let race = tokio::select! {
        result = hub.receive(&config.partition_id, &config.consumer_group, &consumer) => Race::Source(result),
        _ = shutdown.wait() => Race::Interrupted,
        joined = &mut worker_task => Race::Worker(joined),
    };
    // Closes the queue; the worker stops once it is drained
    drop(consumer);

    let outcome = match race {
        Race::Source(Ok(stats)) => {
            info!("Stream ended after {} deliveries, draining queue", stats.delivered);
            finish_worker(worker_task.await).map(|report| (ReadEnd::SourceEnded, report))
        }
        Race::Source(Err(e)) => {
            store.close()?;
            match worker_task.await {
                Ok(Ok(_)) => {}
                Ok(Err(worker_err)) => warn!("Persistence worker failed: {}", worker_err),
                Err(join_err) => warn!("Persistence worker panicked: {}", join_err),
            }
            Err(e)
        }
        Race::Interrupted => {
            info!("Closing store and stopping read operation");
            store.close()?;
            finish_worker(worker_task.await).map(|report| (ReadEnd::Interrupted, report))
        }
        Race::Worker(joined) => finish_worker(joined).map(|report| {
            let end = match report.exit {
                WorkerExit::StoreClosed => ReadEnd::StoreClosed,
                WorkerExit::QueueClosed => ReadEnd::SourceEnded,
            };
            (end, report)
        }),
    };
    metrics::set_gauge(metrics::INGEST_RUNNING, 0.0);

    let closed = store.close();
    let (end, report) = outcome?;
    closed?;

    let summary = ReadSummary {
        end,
        received: received.load(Ordering::Relaxed),
        persisted: report.persisted,
        duplicates: report.duplicates,
    };
    info!(
        "Read finished: {} received, {} persisted, {} duplicates",
        summary.received, summary.persisted, summary.duplicates
    );
    Ok(summary)
}

fn finish_worker(
    joined: std::result::Result<Result<WorkerReport>, tokio::task::JoinError>,
) -> Result<WorkerReport> {
    joined?
}

fn warn_read_to_file() {
    warn!("------------------------------------------------------------");
    warn!("WARNING: 'readToFile' is enabled.");
    warn!("Every new event is written to disk before it is stored,");
    warn!("which slows ingestion considerably. Prefer 'export2file'.");
    warn!("------------------------------------------------------------");
}

/// Export every stored record that has no dump file yet.
///
/// A shutdown request stops the export early, including while the store
/// is still being counted; the result then has `interrupted` set.
pub async fn run_export(config: &Config, store: &Store, shutdown: &Shutdown) -> Result<ExportStats> {
    let handle = store.open()?;
    let materializer = FileMaterializer::new(config.materializer.clone());
    let progress_interval = config.progress_interval;
    let shutdown = shutdown.clone();

    let exported = tokio::task::spawn_blocking(move || {
        let counted = handle.scan(|_, _| Ok(!shutdown.is_triggered()))?;
        if counted.end != ScanEnd::Exhausted {
            info!("Export interrupted while counting records");
            return Ok(ExportStats {
                interrupted: true,
                ..Default::default()
            });
        }
        info!("Store holds {} records", counted.visited);

        ExportEngine::new(handle, materializer, progress_interval).run(&shutdown)
    })
    .await;

    let closed = store.close();
    let stats = exported??;
    closed?;
    Ok(stats)
}

/// Send every file in the outbound directory.
///
/// Once shutdown is requested no further file is started.
pub async fn run_write(
    config: &Config,
    hub: Arc<dyn EventHub>,
    shutdown: &Shutdown,
) -> Result<SendReport> {
    OutboundSender::new(config.outbound.clone(), hub)
        .run(shutdown)
        .await
}

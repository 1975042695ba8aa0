//! Prometheus metrics helpers for hubvault.
//!
//! Recording goes through the `metrics` facade, so callers can emit counters
//! whether or not an exporter is installed. The binary installs the
//! Prometheus recorder and serves `/metrics` only when a port is configured.
//!
//! # Metric Naming Conventions
//!
//! - Prefix: pipeline stage (`ingest_`, `export_`, `outbound_`)
//! - Suffix: unit or type (`_total` for counters)

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Events delivered by the stream source.
pub const INGEST_EVENTS_RECEIVED: &str = "ingest_events_received_total";
/// Events committed to the store for the first time.
pub const INGEST_EVENTS_PERSISTED: &str = "ingest_events_persisted_total";
/// Redelivered events skipped by the dedup check.
pub const INGEST_EVENTS_DUPLICATE: &str = "ingest_events_duplicate_total";
/// 1 while the read pipeline is running.
pub const INGEST_RUNNING: &str = "ingest_running";
/// Records written to disk by the export engine.
pub const EXPORT_RECORDS_WRITTEN: &str = "export_records_written_total";
/// Records skipped by the export engine because the dump already exists.
pub const EXPORT_RECORDS_SKIPPED: &str = "export_records_skipped_total";
/// Outbound files transmitted.
pub const OUTBOUND_FILES_SENT: &str = "outbound_files_sent_total";
/// Outbound files that failed to send or relocate.
pub const OUTBOUND_FILES_FAILED: &str = "outbound_files_failed_total";

/// Install the Prometheus recorder and register metric descriptions.
///
/// Fails if a recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(handle)
}

/// Like [`init_metrics`] but returns `None` instead of an error.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    init_metrics().ok()
}

/// Serve the `/metrics` endpoint on `port` from a background task.
///
/// The listener is bound before returning, so a port conflict is reported to
/// the caller instead of being lost inside the task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

fn register_metrics() {
    describe_counter!(INGEST_EVENTS_RECEIVED, "Events delivered by the stream source");
    describe_counter!(INGEST_EVENTS_PERSISTED, "Events persisted to the store");
    describe_counter!(INGEST_EVENTS_DUPLICATE, "Redelivered events skipped");
    describe_gauge!(INGEST_RUNNING, "Whether the read pipeline is running (1=yes, 0=no)");

    describe_counter!(EXPORT_RECORDS_WRITTEN, "Records exported to dump files");
    describe_counter!(EXPORT_RECORDS_SKIPPED, "Records skipped because the dump exists");

    describe_counter!(OUTBOUND_FILES_SENT, "Outbound files sent to the stream");
    describe_counter!(OUTBOUND_FILES_FAILED, "Outbound files that failed");
}

/// Increment a counter.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();

        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_increment_does_not_panic() {
        ensure_metrics_init();
        increment(INGEST_EVENTS_RECEIVED, 0);
        increment(INGEST_EVENTS_RECEIVED, 1);
        increment(OUTBOUND_FILES_FAILED, 100);
    }

    #[test]
    fn test_set_gauge_does_not_panic() {
        ensure_metrics_init();
        set_gauge(INGEST_RUNNING, 1.0);
        set_gauge(INGEST_RUNNING, 0.0);
    }

    #[test]
    fn test_register_metrics_is_repeatable() {
        ensure_metrics_init();
        register_metrics();
        register_metrics();
    }
}

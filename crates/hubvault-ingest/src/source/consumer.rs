//! Ingestion consumer: turns delivered events into queued records.

use super::{DeliveryHandler, InboundEvent};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use hubvault_core::{Record, metrics};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::info;

/// Delivery handler feeding the persistence queue.
///
/// Waits for queue space when the worker falls behind, so delivery slows
/// down instead of buffering without bound.
pub struct IngestionConsumer {
    queue: mpsc::Sender<Record>,
    received: Arc<AtomicU64>,
    progress_interval: u64,
}

impl IngestionConsumer {
    pub fn new(queue: mpsc::Sender<Record>, progress_interval: u64) -> Self {
        Self {
            queue,
            received: Arc::new(AtomicU64::new(0)),
            progress_interval: progress_interval.max(1),
        }
    }

    /// Counter of events received so far, shared with the caller.
    pub fn received(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.received)
    }
}

#[async_trait]
impl DeliveryHandler for IngestionConsumer {
    async fn on_event(&self, event: InboundEvent) -> Result<()> {
        let record = Record::received(
            event.id,
            event.enqueued_time,
            event.sequence_number,
            event.offset,
            event.body,
            Utc::now(),
        );

        let count = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::increment(metrics::INGEST_EVENTS_RECEIVED, 1);
        if count % self.progress_interval == 0 {
            info!("Received {} events", count);
        }

        self.queue
            .send(record)
            .await
            .map_err(|e| Error::ChannelSend(format!("persistence queue closed ({})", e.0.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: &str) -> InboundEvent {
        InboundEvent {
            id: id.to_string(),
            enqueued_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            sequence_number: Some(7),
            offset: None,
            body: b"hello".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_builds_record_and_queues_it() {
        let (tx, mut rx) = mpsc::channel(4);
        let consumer = IngestionConsumer::new(tx, 1000);

        consumer.on_event(event("e1")).await.unwrap();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.id, "e1");
        assert_eq!(record.sequence_number, Some(7));
        assert_eq!(record.offset, None);
        assert_eq!(record.payload, b"hello");
        assert!(record.dump_filename.ends_with("--e1.txt"));
        assert!(record.elapsed_time.is_empty());
        assert_eq!(consumer.received().load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_is_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let consumer = IngestionConsumer::new(tx, 1000);

        let err = consumer.on_event(event("e1")).await.unwrap_err();
        assert!(matches!(err, Error::ChannelSend(_)));
    }

    #[tokio::test]
    async fn test_full_queue_waits() {
        let (tx, mut rx) = mpsc::channel(1);
        let consumer = Arc::new(IngestionConsumer::new(tx, 1000));
        consumer.on_event(event("e1")).await.unwrap();

        let pending = {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.on_event(event("e2")).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        assert_eq!(rx.recv().await.unwrap().id, "e1");
        pending.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().id, "e2");
    }
}

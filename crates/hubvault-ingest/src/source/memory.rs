//! In-process event hub.
//!
//! Events published to a [`MemoryHub`] are delivered to its single
//! subscriber in publish order; publishing the same event twice simulates a
//! redelivery. Sent payloads are recorded and can be inspected.

use super::{DeliveryHandler, EventHub, InboundEvent, ReceiveStats, log_handler_error};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// In-memory hub. Clones share state.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<Inner>,
}

struct Inner {
    entity_path: String,
    publisher: Mutex<Option<mpsc::UnboundedSender<InboundEvent>>>,
    subscription: Mutex<Option<mpsc::UnboundedReceiver<InboundEvent>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    rejected: Mutex<Vec<Vec<u8>>>,
}

impl MemoryHub {
    pub fn new(entity_path: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                entity_path: entity_path.into(),
                publisher: Mutex::new(Some(tx)),
                subscription: Mutex::new(Some(rx)),
                sent: Mutex::new(Vec::new()),
                rejected: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Queue an event for delivery. Returns `false` once the hub is closed.
    pub fn publish(&self, event: InboundEvent) -> bool {
        match self.inner.publisher.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// End the stream once queued events are delivered.
    pub fn close(&self) {
        self.inner.publisher.lock().take();
    }

    /// Payloads accepted by [`EventHub::send`], in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.inner.sent.lock().clone()
    }

    /// Make every future send of exactly `payload` fail.
    pub fn reject(&self, payload: impl Into<Vec<u8>>) {
        self.inner.rejected.lock().push(payload.into());
    }
}

#[async_trait]
impl EventHub for MemoryHub {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn entity_path(&self) -> &str {
        &self.inner.entity_path
    }

    async fn receive(
        &self,
        partition: &str,
        consumer_group: &str,
        handler: &dyn DeliveryHandler,
    ) -> Result<ReceiveStats> {
        let mut events = self.inner.subscription.lock().take().ok_or_else(|| {
            Error::Connect(format!(
                "hub '{}' already has a subscriber",
                self.inner.entity_path
            ))
        })?;
        tracing::info!(
            "Subscribed to {}/{} (consumer group {})",
            self.inner.entity_path,
            partition,
            consumer_group
        );

        let mut stats = ReceiveStats::default();
        while let Some(event) = events.recv().await {
            stats.delivered += 1;
            let id = event.id.clone();
            if let Err(e) = handler.on_event(event).await {
                stats.handler_errors += 1;
                log_handler_error(&id, &e);
            }
        }
        Ok(stats)
    }

    async fn send(&self, payload: Vec<u8>) -> Result<()> {
        if self.inner.rejected.lock().contains(&payload) {
            return Err(Error::Transmission(format!(
                "hub '{}' rejected the event",
                self.inner.entity_path
            )));
        }
        self.inner.sent.lock().push(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct Collect(Mutex<Vec<String>>);

    #[async_trait]
    impl DeliveryHandler for Collect {
        async fn on_event(&self, event: InboundEvent) -> Result<()> {
            if event.id == "bad" {
                return Err(Error::ChannelSend("nope".to_string()));
            }
            self.0.lock().push(event.id);
            Ok(())
        }
    }

    fn event(id: &str) -> InboundEvent {
        InboundEvent {
            id: id.to_string(),
            enqueued_time: Utc::now(),
            sequence_number: None,
            offset: None,
            body: vec![],
        }
    }

    #[tokio::test]
    async fn test_delivers_in_order_and_survives_handler_errors() {
        let hub = MemoryHub::new("eh1");
        for id in ["a", "bad", "b", "a"] {
            assert!(hub.publish(event(id)));
        }
        hub.close();
        assert!(!hub.publish(event("late")));

        let handler = Collect(Mutex::new(Vec::new()));
        let stats = hub.receive("0", "$Default", &handler).await.unwrap();

        assert_eq!(stats.delivered, 4);
        assert_eq!(stats.handler_errors, 1);
        assert_eq!(*handler.0.lock(), vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn test_single_subscriber() {
        let hub = MemoryHub::new("eh1");
        hub.close();
        let handler = Collect(Mutex::new(Vec::new()));
        hub.receive("0", "cg", &handler).await.unwrap();

        let err = hub.receive("0", "cg", &handler).await.unwrap_err();
        assert!(matches!(err, Error::Connect(_)));
    }

    #[tokio::test]
    async fn test_send_records_and_rejects() {
        let hub = MemoryHub::new("eh1");
        hub.reject(b"bad".to_vec());

        hub.send(b"ok".to_vec()).await.unwrap();
        assert!(hub.send(b"bad".to_vec()).await.is_err());
        assert_eq!(hub.sent(), vec![b"ok".to_vec()]);
    }
}

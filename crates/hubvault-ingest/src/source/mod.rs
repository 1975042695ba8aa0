//! Event hub adapters.
//!
//! This module provides the streaming-service abstraction the pipeline talks
//! to, plus the adapters behind it.
//!
//! # Available Adapters
//!
//! - [`TcpHub`] - JSON-lines gateway reached over TCP (`Endpoint=tcp://host:port`)
//! - [`MemoryHub`] - In-process hub for embedding and tests
//!
//! # Architecture
//!
//! All adapters implement [`EventHub`]. Receiving pushes every delivered
//! event into a [`DeliveryHandler`]; a handler error is logged and delivery
//! continues with the next event. Delivery is at-least-once, so handlers
//! must tolerate redelivered ids.

mod connection;
mod consumer;
mod memory;
mod tcp;

pub use connection::ConnectionString;
pub use consumer::IngestionConsumer;
pub use memory::MemoryHub;
pub use tcp::TcpHub;

use crate::error::{Error, Result};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One event as delivered by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Producer-assigned event id.
    pub id: String,

    /// When the event entered the stream.
    pub enqueued_time: DateTime<Utc>,

    /// Stream sequence number, if the service reports one.
    pub sequence_number: Option<i64>,

    /// Stream offset, if the service reports one.
    pub offset: Option<i64>,

    /// Event body.
    pub body: Vec<u8>,
}

/// Callback invoked for every delivered event.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Handle one event. Errors are reported to the hub, which logs them.
    async fn on_event(&self, event: InboundEvent) -> Result<()>;
}

/// Counters for one receive session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    /// Events handed to the handler.
    pub delivered: u64,

    /// Events the handler rejected.
    pub handler_errors: u64,
}

/// A partitioned event streaming service.
#[async_trait]
pub trait EventHub: Send + Sync {
    /// Human-readable adapter name (used in logs).
    fn name(&self) -> &'static str;

    /// The hub (entity) this client is bound to.
    fn entity_path(&self) -> &str;

    /// Receive events from one partition, newest only, until the stream ends.
    ///
    /// Returns an error if the subscription cannot be established or the
    /// stream fails. Dropping the future cancels the subscription.
    async fn receive(
        &self,
        partition: &str,
        consumer_group: &str,
        handler: &dyn DeliveryHandler,
    ) -> Result<ReceiveStats>;

    /// Send one event and wait for the service to accept it.
    async fn send(&self, payload: Vec<u8>) -> Result<()>;
}

/// Connect to the hub named by a connection string.
///
/// The adapter is chosen by the scheme of its `Endpoint`.
pub async fn connect(conn: &ConnectionString) -> Result<Arc<dyn EventHub>> {
    let endpoint = conn
        .endpoint()
        .ok_or_else(|| Error::Config("connection string has no 'Endpoint'".to_string()))?;
    let entity_path = conn
        .entity_path()
        .ok_or_else(|| Error::Config("connection string has no 'EntityPath'".to_string()))?;

    let (scheme, address) = endpoint.split_once("://").ok_or_else(|| {
        Error::Config(format!("endpoint '{}' has no scheme", endpoint))
    })?;

    match scheme {
        "tcp" => {
            let hub = TcpHub::connect(address.trim_end_matches('/'), entity_path, conn).await?;
            Ok(Arc::new(hub))
        }
        other => Err(Error::Config(format!(
            "unsupported endpoint scheme '{}' (supported: tcp)",
            other
        ))),
    }
}

/// Like [`connect`], but gives up with `Ok(None)` once shutdown is requested.
pub async fn connect_until_shutdown(
    conn: &ConnectionString,
    shutdown: &Shutdown,
) -> Result<Option<Arc<dyn EventHub>>> {
    tokio::select! {
        biased;
        _ = shutdown.wait() => Ok(None),
        hub = connect(conn) => hub.map(Some),
    }
}

/// Report a handler failure the way every adapter does.
pub(crate) fn log_handler_error(id: &str, err: &Error) {
    tracing::error!("[ERROR] Failed to handle event {}. Details: {}", id, err);
}

//! Event hub reached through a JSON-lines TCP gateway.
//!
//! Every request opens its own connection and starts with one request line.
//!
//! Receive:
//!
//! ```text
//! → {"op":"receive","entityPath":"eh1","partition":"0","consumerGroup":"$Default",...}
//! ← {"type":"subscribed","partitionIds":["0","1"]}
//! ← {"type":"event","id":"e1","enqueuedTime":"2024-01-01T00:00:00Z","body":"aGVsbG8=",...}
//! ← ...
//! ```
//!
//! Send:
//!
//! ```text
//! → {"op":"send","entityPath":"eh1","body":"aGVsbG8=",...}
//! ← {"type":"ack"}
//! ```
//!
//! Either side may answer `{"type":"error","message":"..."}` instead.
//! Bodies are opaque bytes carried as standard base64 (`"aGVsbG8="` above
//! is `hello`).

use super::{
    ConnectionString, DeliveryHandler, EventHub, InboundEvent, ReceiveStats, log_handler_error,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, info};

/// Base64 (de)serialization for event bodies.
mod body {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| serde::de::Error::custom(format!("body is not valid base64: {e}")))
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum Request<'a> {
    #[serde(rename_all = "camelCase")]
    Receive {
        entity_path: &'a str,
        partition: &'a str,
        consumer_group: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        key_name: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<&'a str>,
    },
    #[serde(rename_all = "camelCase")]
    Send {
        entity_path: &'a str,
        #[serde(serialize_with = "body::serialize")]
        body: &'a [u8],
        #[serde(skip_serializing_if = "Option::is_none")]
        key_name: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<&'a str>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Reply {
    #[serde(rename_all = "camelCase")]
    Subscribed {
        #[serde(default)]
        partition_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Event {
        id: String,
        enqueued_time: DateTime<Utc>,
        #[serde(default)]
        sequence_number: Option<i64>,
        #[serde(default)]
        offset: Option<i64>,
        #[serde(default, deserialize_with = "body::deserialize")]
        body: Vec<u8>,
    },
    Ack,
    Error {
        message: String,
    },
}

/// Client for a JSON-lines event gateway.
pub struct TcpHub {
    address: String,
    entity_path: String,
    key_name: Option<String>,
    key: Option<String>,
}

impl TcpHub {
    /// Create a client and check that the gateway is reachable.
    pub async fn connect(address: &str, entity_path: &str, conn: &ConnectionString) -> Result<Self> {
        let hub = Self {
            address: address.to_string(),
            entity_path: entity_path.to_string(),
            key_name: conn.key_name().map(str::to_string),
            key: conn.key().map(str::to_string),
        };
        drop(hub.open().await?);
        info!("Connected to event gateway at {}", hub.address);
        Ok(hub)
    }

    async fn open(&self) -> Result<TcpStream> {
        TcpStream::connect(&self.address)
            .await
            .map_err(|e| Error::Connect(format!("cannot reach {}: {}", self.address, e)))
    }

    /// Open a connection, write one request line, and return the reply reader.
    async fn request(&self, request: &Request<'_>) -> Result<ReplyReader> {
        let stream = self.open().await?;
        let (read, mut write) = stream.into_split();

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        write.write_all(&line).await?;
        write.flush().await?;

        Ok(ReplyReader {
            lines: BufReader::new(read),
            buf: String::new(),
            _write: write,
        })
    }
}

struct ReplyReader {
    lines: BufReader<OwnedReadHalf>,
    buf: String,
    // Dropping the write half would half-close the connection
    _write: tokio::net::tcp::OwnedWriteHalf,
}

impl ReplyReader {
    /// Next reply, or `None` at end of stream. Blank lines are skipped.
    async fn next(&mut self) -> Result<Option<Reply>> {
        loop {
            self.buf.clear();
            if self.lines.read_line(&mut self.buf).await? == 0 {
                return Ok(None);
            }
            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(line)?));
        }
    }
}

#[async_trait]
impl EventHub for TcpHub {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    async fn receive(
        &self,
        partition: &str,
        consumer_group: &str,
        handler: &dyn DeliveryHandler,
    ) -> Result<ReceiveStats> {
        let mut replies = self
            .request(&Request::Receive {
                entity_path: &self.entity_path,
                partition,
                consumer_group,
                key_name: self.key_name.as_deref(),
                key: self.key.as_deref(),
            })
            .await?;

        match replies.next().await? {
            Some(Reply::Subscribed { partition_ids }) => info!(
                "Subscribed to {}/{} (consumer group {}, partitions: {:?})",
                self.entity_path, partition, consumer_group, partition_ids
            ),
            Some(Reply::Error { message }) => {
                return Err(Error::Connect(format!("subscription refused: {}", message)));
            }
            Some(other) => {
                return Err(Error::Connect(format!(
                    "unexpected gateway reply to subscribe: {:?}",
                    other
                )));
            }
            None => {
                return Err(Error::Connect(
                    "gateway closed the connection before subscribing".to_string(),
                ));
            }
        }

        let mut stats = ReceiveStats::default();
        while let Some(reply) = replies.next().await? {
            match reply {
                Reply::Event {
                    id,
                    enqueued_time,
                    sequence_number,
                    offset,
                    body,
                } => {
                    stats.delivered += 1;
                    let event = InboundEvent {
                        id: id.clone(),
                        enqueued_time,
                        sequence_number,
                        offset,
                        body,
                    };
                    if let Err(e) = handler.on_event(event).await {
                        stats.handler_errors += 1;
                        log_handler_error(&id, &e);
                    }
                }
                Reply::Error { message } => {
                    return Err(Error::Connect(format!("stream failed: {}", message)));
                }
                other => debug!("Ignoring gateway reply {:?}", other),
            }
        }

        info!("Gateway ended the stream after {} events", stats.delivered);
        Ok(stats)
    }

    async fn send(&self, payload: Vec<u8>) -> Result<()> {
        let mut replies = self
            .request(&Request::Send {
                entity_path: &self.entity_path,
                body: &payload,
                key_name: self.key_name.as_deref(),
                key: self.key.as_deref(),
            })
            .await
            .map_err(|e| Error::Transmission(e.to_string()))?;

        match replies.next().await {
            Ok(Some(Reply::Ack)) => Ok(()),
            Ok(Some(Reply::Error { message })) => Err(Error::Transmission(message)),
            Ok(Some(other)) => Err(Error::Transmission(format!(
                "unexpected gateway reply to send: {:?}",
                other
            ))),
            Ok(None) => Err(Error::Transmission(
                "gateway closed the connection without acknowledging".to_string(),
            )),
            Err(e) => Err(Error::Transmission(e.to_string())),
        }
    }
}

//! The canonical unit of work: one inbound event plus processing metadata.
//!
//! A [`Record`] is built once when an event is delivered by the stream
//! source, persisted under its `id` at most once, and can later be
//! materialized to disk either as its raw payload or as a multi-field
//! report (see [`Record::to_report`]).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::time::Duration;

/// Format of the date partition directory under the dump root.
pub const PARTITION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Internal representation of one inbound event plus processing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Globally unique event identifier; the deduplication key.
    pub id: String,

    /// When the event entered the remote stream.
    pub queued_time: DateTime<Utc>,

    /// Stream position supplied by the source, if any.
    pub sequence_number: Option<i64>,

    /// Stream offset supplied by the source, if any.
    pub offset: Option<i64>,

    /// When the record entered this system.
    pub processed_at: DateTime<Utc>,

    /// Human-readable time between `processed_at` and the persistence attempt.
    /// Empty until the record is persisted.
    pub elapsed_time: String,

    /// Relative file name used when the record is materialized.
    pub dump_filename: String,

    /// Opaque event body.
    pub payload: Vec<u8>,
}

impl Record {
    /// Build a record for an event that has just been delivered.
    ///
    /// `processed_at` is set to `now` and the dump filename is derived from
    /// the same instant, so the two always agree.
    pub fn received(
        id: impl Into<String>,
        queued_time: DateTime<Utc>,
        sequence_number: Option<i64>,
        offset: Option<i64>,
        payload: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        let dump_filename = dump_filename(&id, now);
        Self {
            id,
            queued_time,
            sequence_number,
            offset,
            processed_at: now,
            elapsed_time: String::new(),
            dump_filename,
            payload,
        }
    }

    /// The dedup key as raw bytes.
    pub fn key(&self) -> &[u8] {
        self.id.as_bytes()
    }

    /// Stamp the time spent between receipt and `now`.
    pub fn mark_elapsed(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.processed_at).to_std().unwrap_or_default();
        self.elapsed_time = format_elapsed(elapsed);
    }

    /// Date partition (`YYYY-MM-DD`) this record's dump belongs to.
    pub fn partition(&self) -> String {
        self.processed_at.format(PARTITION_DATE_FORMAT).to_string()
    }

    /// Render the multi-field text report used for full dumps.
    pub fn to_report(&self) -> String {
        let mut out = String::with_capacity(512 + self.payload.len());
        let rule = "-".repeat(53);

        // Writing into a String cannot fail.
        let _ = writeln!(out, "---| DETAILS      |{rule}");
        let _ = writeln!(out, "id: {}", self.id);
        let _ = writeln!(out, "added to queue at: {}", rfc3339_nanos(&self.queued_time));
        let _ = writeln!(out, "event sequence number: {}", optional(self.sequence_number));
        let _ = writeln!(out, "event offset: {}", optional(self.offset));
        let _ = writeln!(out, "message processed at: {}", rfc3339_nanos(&self.processed_at));
        let _ = writeln!(out, "processing elapsed time: {}", self.elapsed_time);
        let _ = writeln!(out);
        let _ = writeln!(out, "---| MESSAGE BODY |{rule}");
        out.push_str(&String::from_utf8_lossy(&self.payload));
        out
    }
}

/// Dump file name for an event: `<YYYY-MM-DDTHH-MM-SS.cc>--<id>.txt`.
///
/// `cc` is hundredths of a second. Path separators in the id are replaced
/// so the name always stays inside its partition directory.
pub fn dump_filename(id: &str, at: DateTime<Utc>) -> String {
    let safe_id: String = id
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    format!("{}--{}.txt", file_timestamp(at), safe_id)
}

/// Timestamp used as a file name prefix: `YYYY-MM-DDTHH-MM-SS.cc`.
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    let centis = at.timestamp_subsec_millis() / 10;
    format!("{}.{:02}", at.format("%Y-%m-%dT%H-%M-%S"), centis)
}

/// Format a duration the way operators read it in reports, e.g. `1.5ms`.
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:?}", elapsed)
}

fn rfc3339_nanos(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn optional(value: Option<i64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

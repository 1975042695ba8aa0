//! Core types and shared utilities for the hubvault event store.
//!
//! This crate provides:
//! - The [`Record`] data model for one ingested event
//! - The storage codec ([`encode`] / [`decode`])
//! - Dump file naming and report formatting
//! - Prometheus metrics helpers
//! - Shared error types

pub mod codec;
mod error;
pub mod metrics;
pub mod record;

pub use codec::{decode, encode};
pub use error::{Error, Result};
pub use record::{Record, dump_filename, file_timestamp, format_elapsed};

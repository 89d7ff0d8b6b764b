//! SQLite-backed metadata store for the response and object caches.
//!
//! This module provides persistent cache metadata using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - Single-statement upserts so concurrent writers never check-then-act

pub mod connection;
pub mod downloads;
pub mod hash;
pub mod migrations;
pub mod responses;

pub use crate::Error;

pub use connection::CacheDb;
pub use downloads::{Download, DownloadCounts};
pub use responses::ResponseRow;

use chrono::{DateTime, SecondsFormat, Utc};

/// Render a timestamp in the fixed-width form stored in every table.
///
/// Microsecond precision with a `Z` suffix keeps lexicographic and
/// chronological order identical, which the expiry and LRU queries rely on.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp back into UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|ts| ts.with_timezone(&Utc))
}

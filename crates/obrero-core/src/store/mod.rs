//! SQLite-backed persistence: the worker's own run records and the
//! adapter over the shared store producers write workflow rows into.

pub mod run_store;
pub mod shared_store;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

pub use run_store::RunStore;
pub use shared_store::{SharedStore, SharedWorkflow};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("invalid stored timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// ISO-8601 UTC with second precision, the shared store's wire format.
pub(crate) fn iso_utc_seconds(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub(crate) fn parse_stored_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp(raw.to_string()))
}

/// Elapsed seconds between two instants, as stored in duration columns.
pub(crate) fn duration_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

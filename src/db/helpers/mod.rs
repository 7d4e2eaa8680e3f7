use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use log::warn;

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

/// Stored durations are nullable; a negative one is treated the same as a
/// missing one by every store.
pub fn stored_seconds(value: Option<i64>, record_id: &str) -> Option<u64> {
    let value = value?;
    match u64::try_from(value) {
        Ok(seconds) => Some(seconds),
        Err(_) => {
            warn!("Ignoring negative duration {value}s on record {record_id}");
            None
        }
    }
}

/// Fixed-width UTC timestamps, so `created_at` compares correctly as TEXT.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

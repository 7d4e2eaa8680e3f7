//! Civil-day keys.
//!
//! A day key is the `YYYY-MM-DD` date an instant falls on in a specific IANA
//! timezone. Daily goals reset at local midnight, so every "is this today"
//! decision in the crate goes through these helpers instead of UTC dates.

use std::{cmp::Ordering, fmt};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DAY_KEY_FORMAT: &str = "%Y-%m-%d";
const GAP_PROBE_STEP_MINUTES: i64 = 15;
const GAP_PROBE_LIMIT: usize = 4 * 24;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DayKeyError {
    #[error("unknown IANA timezone '{0}'")]
    InvalidTimezone(String),
    #[error("invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

/// Zero-padded `YYYY-MM-DD`. Ordering is plain string ordering, which matches
/// calendar ordering only because of the fixed-width format.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(String);

impl DayKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format(DAY_KEY_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, DayKeyError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| DayKeyError::InvalidTimezone(name.to_string()))
}

pub fn get_day_key(instant: DateTime<Utc>, tz: Tz) -> DayKey {
    DayKey::from_date(instant.with_timezone(&tz).date_naive())
}

pub fn get_day_key_for(instant: DateTime<Utc>, timezone: &str) -> Result<DayKey, DayKeyError> {
    let tz = parse_timezone(timezone)?;
    Ok(get_day_key(instant, tz))
}

pub fn day_key_from_rfc3339(timestamp: &str, timezone: &str) -> Result<DayKey, DayKeyError> {
    let instant = DateTime::parse_from_rfc3339(timestamp.trim())
        .map_err(|err| DayKeyError::InvalidTimestamp {
            value: timestamp.to_string(),
            reason: err.to_string(),
        })?
        .with_timezone(&Utc);
    get_day_key_for(instant, timezone)
}

pub fn get_today_key(tz: Tz) -> DayKey {
    today_key_at(Utc::now(), tz)
}

pub fn today_key_at(now: DateTime<Utc>, tz: Tz) -> DayKey {
    get_day_key(now, tz)
}

pub fn compare_day_keys(a: &DayKey, b: &DayKey) -> Ordering {
    a.as_str().cmp(b.as_str())
}

pub fn is_day_key_today(key: &DayKey, tz: Tz) -> bool {
    is_day_key_today_at(key, tz, Utc::now())
}

pub fn is_day_key_today_at(key: &DayKey, tz: Tz, now: DateTime<Utc>) -> bool {
    compare_day_keys(key, &today_key_at(now, tz)) == Ordering::Equal
}

pub fn is_day_key_future(key: &DayKey, tz: Tz) -> bool {
    is_day_key_future_at(key, tz, Utc::now())
}

pub fn is_day_key_future_at(key: &DayKey, tz: Tz, now: DateTime<Utc>) -> bool {
    compare_day_keys(key, &today_key_at(now, tz)) == Ordering::Greater
}

/// Half-open `[start, end)` interval covering whole civil days in one zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn containing(instant: DateTime<Utc>, tz: Tz) -> Self {
        Self::for_date(instant.with_timezone(&tz).date_naive(), tz)
    }

    pub fn for_date(date: NaiveDate, tz: Tz) -> Self {
        Self::spanning(date, date, tz)
    }

    /// Covers `first..=last`. Swapped arguments are normalised.
    pub fn spanning(first: NaiveDate, last: NaiveDate, tz: Tz) -> Self {
        let (first, last) = if first <= last { (first, last) } else { (last, first) };
        let start = start_of_civil_day(first, tz);
        let end = match last.succ_opt() {
            Some(next) => start_of_civil_day(next, tz),
            None => DateTime::<Utc>::MAX_UTC,
        };
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

// Local midnight can fall inside a DST gap, in which case the day starts at
// the first local time the zone actually observes.
fn start_of_civil_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = NaiveDateTime::new(date, NaiveTime::MIN);
    let mut candidate = midnight;
    for _ in 0..GAP_PROBE_LIMIT {
        if let Some(resolved) = tz.from_local_datetime(&candidate).earliest() {
            return resolved.with_timezone(&Utc);
        }
        candidate += Duration::minutes(GAP_PROBE_STEP_MINUTES);
    }
    Utc.from_utc_datetime(&midnight)
}

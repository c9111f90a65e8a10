//! Timestamp codec for the storage boundary.
//!
//! The API speaks `chrono::DateTime<Utc>`; storage holds microseconds since
//! the Unix epoch. Microseconds keep the full i64 range well past any
//! plausible expiration date while staying infallible to encode.

use chrono::{DateTime, Utc};

pub(crate) fn to_micros(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub(crate) fn opt_to_micros(instant: Option<DateTime<Utc>>) -> Option<i64> {
    instant.map(to_micros)
}

pub(crate) fn opt_from_micros(micros: Option<i64>) -> Option<DateTime<Utc>> {
    micros.map(from_micros)
}

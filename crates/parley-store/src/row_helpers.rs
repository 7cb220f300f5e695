//! Timestamp encoding shared by the repos.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so that SQL
//! string comparison orders them chronologically.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::StoreError;

pub fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_ts() -> String {
    encode_ts(&Utc::now())
}

pub fn decode_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRow(format!("bad timestamp {raw:?}: {e}")))
}

//! Checkpoint timestamps.
//!
//! Sync timestamps are UTC with whole-second precision and travel as
//! `YYYY-MM-DD HH:MM:SS`, the format chainquery compares `modified_at`
//! against. RFC 3339 is also accepted when reading.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Lower bound used before the first completed pass (`0001-01-01 00:00:00`).
pub fn min_sync_time() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Current time truncated to whole seconds.
///
/// Truncating down keeps the `modified_at >= since` filter inclusive of
/// anything modified within the same second.
pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

pub fn format_sql(ts: &DateTime<Utc>) -> String {
    ts.format(SQL_DATETIME_FORMAT).to_string()
}

pub fn parse_sync_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, SQL_DATETIME_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(0))
}

/// serde adapter for `DateTime<Utc>` in the SQL datetime format.
pub mod sql_datetime {
    use super::*;

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_sql(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_sync_time(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid sync timestamp '{s}'")))
    }
}

/// Same as [`sql_datetime`] for optional fields.
pub mod sql_datetime_opt {
    use super::*;

    pub fn serialize<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match ts {
            Some(ts) => serializer.serialize_some(&format_sql(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => parse_sync_time(&s).map(Some).ok_or_else(|| {
                serde::de::Error::custom(format!("invalid sync timestamp '{s}'"))
            }),
            None => Ok(None),
        }
    }
}

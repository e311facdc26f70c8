//! The canonical lookup key of every parameter series: a UTC instant truncated to the hour.

use crate::types::into_utc_trait::IntoUtcDateTime;
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Fixed textual form used in the durable cache file, e.g. `2024-01-01T02:00:00Z`.
pub const HOUR_KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A UTC timestamp truncated to the full hour.
///
/// Any instant converted into an `HourKey` lands in the bucket of the UTC hour it falls into,
/// regardless of the timezone it was expressed in, so `13:59+01:00` and `12:00Z` share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourKey(DateTime<Utc>);

impl HourKey {
    /// Creates the key of the hour `instant` falls into.
    pub fn new<T: IntoUtcDateTime>(instant: T) -> Self {
        let utc = instant.into_utc();
        let truncated = utc
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(utc);
        HourKey(truncated)
    }

    /// The start of the hour as a UTC instant.
    pub fn as_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for HourKey {
    fn from(value: DateTime<Utc>) -> Self {
        HourKey::new(value)
    }
}

impl fmt::Display for HourKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(HOUR_KEY_FORMAT))
    }
}

impl FromStr for HourKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let naive = NaiveDateTime::parse_from_str(s, HOUR_KEY_FORMAT)?;
        Ok(HourKey::new(naive.and_utc()))
    }
}

impl Serialize for HourKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HourKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

//! Shared value types for the dispatch domain.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Format used when a timestamp becomes part of a result key.
pub const RESULT_KEY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly. Serialised as whole seconds since the Unix epoch, which is how
/// event payloads carry time on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a [`Timestamp`] from seconds since the Unix epoch.
    ///
    /// Returns `None` when the value is outside the representable range.
    pub fn from_unix_seconds(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    /// Returns the timestamp as whole seconds since the Unix epoch.
    pub fn unix_seconds(self) -> i64 {
        self.0.timestamp()
    }

    /// Drops sub-second precision, matching what survives serialisation.
    #[must_use]
    pub fn truncated_to_seconds(self) -> Self {
        Self::from_unix_seconds(self.unix_seconds()).unwrap_or(self)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Formats the timestamp for use inside a result key.
    pub fn result_key_format(self) -> String {
        self.0.format(RESULT_KEY_TIME_FORMAT).to_string()
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.unix_seconds()
    }
}

impl TryFrom<i64> for Timestamp {
    type Error = String;

    fn try_from(secs: i64) -> Result<Self, Self::Error> {
        Timestamp::from_unix_seconds(secs).ok_or_else(|| format!("timestamp out of range: {secs}"))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_serializes_as_unix_seconds() {
        let ts = Timestamp::from_unix_seconds(1_700_000_000).unwrap();
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1700000000");
        let back: Timestamp = serde_json::from_str("1700000000").unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_result_key_format_has_microseconds() {
        let ts = Timestamp::from_unix_seconds(0).unwrap();
        assert_eq!(ts.result_key_format(), "1970-01-01T00:00:00.000000");
    }
}

//! Timestamp clock
//!
//! Every ordering decision in the sync engine compares [`Timestamp`] values.
//! Backends hand us either integer epoch milliseconds or date strings; both are
//! normalised to milliseconds at the adapter boundary.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Last-modified marker in Unix milliseconds (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Self = Self(0);

    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Parse an epoch-millisecond integer, an RFC 3339 string,
    /// `YYYY-MM-DD HH:MM:SS` (UTC) or a bare `YYYY-MM-DD` date.
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(Error::InvalidTimestamp("empty value".to_string()));
        }

        if let Ok(millis) = value.parse::<i64>() {
            return Ok(Self(millis));
        }

        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return Ok(Self(parsed.with_timezone(&Utc).timestamp_millis()));
        }

        for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
                return Ok(Self(parsed.and_utc().timestamp_millis()));
            }
        }

        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(Self(midnight.and_utc().timestamp_millis()));
            }
        }

        Err(Error::InvalidTimestamp(value.to_string()))
    }

    /// Milliseconds elapsed between `self` and a later `now` (negative if `self` is in the future).
    #[must_use]
    pub const fn millis_until(self, now: Self) -> i64 {
        now.0.saturating_sub(self.0)
    }

    /// Whether more than `period` has elapsed between `self` and `now`.
    #[must_use]
    pub fn is_older_than(self, period: Duration, now: Self) -> bool {
        let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX);
        self.millis_until(now) > period_ms
    }

    #[must_use]
    pub const fn saturating_sub(self, period: Duration) -> Self {
        let millis = period.as_millis();
        let period_ms = if millis > i64::MAX as u128 {
            i64::MAX
        } else {
            millis as i64
        };
        Self(self.0.saturating_sub(period_ms))
    }

    #[must_use]
    pub const fn saturating_add(self, period: Duration) -> Self {
        let millis = period.as_millis();
        let period_ms = if millis > i64::MAX as u128 {
            i64::MAX
        } else {
            millis as i64
        };
        Self(self.0.saturating_add(period_ms))
    }

    /// RFC 3339 rendering with millisecond precision.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.0).map_or_else(
            || self.0.to_string(),
            |value| value.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp_millis())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TimestampVisitor;

        impl Visitor<'_> for TimestampVisitor {
            type Value = Timestamp;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("epoch milliseconds or a date/time string")
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<Timestamp, E> {
                Ok(Timestamp(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<Timestamp, E> {
                i64::try_from(value)
                    .map(Timestamp)
                    .map_err(|_| E::custom(format!("timestamp {value} out of range")))
            }

            #[allow(clippy::cast_possible_truncation)]
            fn visit_f64<E: de::Error>(self, value: f64) -> std::result::Result<Timestamp, E> {
                if value.is_finite() {
                    Ok(Timestamp(value.trunc() as i64))
                } else {
                    Err(E::custom("timestamp must be finite"))
                }
            }

            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Timestamp, E> {
                Timestamp::parse(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(TimestampVisitor)
    }
}

/// Source of "now" for grace-period and last-modified decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually driven clock for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub const fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.as_millis()),
        }
    }

    pub fn set(&self, value: Timestamp) {
        self.millis.store(value.as_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, period: Duration) {
        let next = self.now().saturating_add(period);
        self.set(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_and_date_forms() {
        assert_eq!(Timestamp::parse("1704067200000").unwrap().as_millis(), 1_704_067_200_000);
        assert_eq!(
            Timestamp::parse("2024-01-01").unwrap(),
            Timestamp::from_millis(1_704_067_200_000)
        );
        assert_eq!(
            Timestamp::parse("2024-01-01T00:00:01Z").unwrap(),
            Timestamp::from_millis(1_704_067_201_000)
        );
        assert_eq!(
            Timestamp::parse("2024-01-01 00:00:02").unwrap(),
            Timestamp::from_millis(1_704_067_202_000)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(Timestamp::parse("").is_err());
        assert!(Timestamp::parse("yesterday").is_err());
    }

    #[test]
    fn string_dates_order_like_their_instants() {
        let earlier = Timestamp::parse("2024-01-01").unwrap();
        let later = Timestamp::parse("2024-01-02").unwrap();
        assert!(earlier < later);
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let from_number: Timestamp = serde_json::from_str("42").unwrap();
        let from_string: Timestamp = serde_json::from_str("\"1970-01-01T00:00:00.042Z\"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(serde_json::to_string(&from_number).unwrap(), "42");
    }

    #[test]
    fn grace_period_boundary_is_strict() {
        let now = Timestamp::from_millis(1_000_000);
        let period = Duration::from_millis(1_000);
        assert!(Timestamp::from_millis(998_999).is_older_than(period, now));
        assert!(!Timestamp::from_millis(999_000).is_older_than(period, now));
        assert!(!Timestamp::from_millis(999_001).is_older_than(period, now));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Timestamp::from_millis(10));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now(), Timestamp::from_millis(15));
        clock.set(Timestamp::EPOCH);
        assert_eq!(clock.now(), Timestamp::EPOCH);
    }
}

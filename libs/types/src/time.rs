//! Timestamp handling for the monitor
//!
//! All internal timestamps are Unix seconds as `f64`. Producers disagree on
//! units (some emit millisecond integers, some fractional seconds), so every
//! inbound timestamp goes through [`coerce_timestamp`] exactly once, at the
//! normalization boundary.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Unix timestamp in seconds.
pub type UnixSeconds = f64;

/// Values at or above this are treated as milliseconds.
///
/// 13-digit values are unambiguous: 1e12 seconds is the year 33658.
const MILLIS_THRESHOLD: f64 = 1_000_000_000_000.0;

/// Coerce a raw numeric timestamp into Unix seconds.
///
/// Returns `None` for non-positive or non-finite values; millisecond inputs
/// are scaled down to seconds.
pub fn coerce_timestamp(raw: f64) -> Option<UnixSeconds> {
    if !raw.is_finite() || raw <= 0.0 {
        return None;
    }
    if raw >= MILLIS_THRESHOLD {
        Some(raw / 1000.0)
    } else {
        Some(raw)
    }
}

/// Render a Unix-seconds timestamp as an ISO-8601 UTC string with millisecond
/// precision (e.g. `2025-10-30T16:36:00.000Z`).
///
/// Out-of-range timestamps fall back to the epoch rather than panicking; the
/// ISO form is presentation-only and never fed back into the engine.
pub fn isoformat(ts: UnixSeconds) -> String {
    let secs = ts.floor() as i64;
    let nanos = ((ts - ts.floor()) * 1_000_000_000.0) as u32;
    let dt: DateTime<Utc> = Utc
        .timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_seconds_passthrough() {
        assert_eq!(coerce_timestamp(1_761_840_360.0), Some(1_761_840_360.0));
        assert_eq!(coerce_timestamp(1_761_840_360.25), Some(1_761_840_360.25));
    }

    #[test]
    fn test_coerce_millis_scaled() {
        assert_eq!(coerce_timestamp(1_761_840_360_000.0), Some(1_761_840_360.0));
        assert_eq!(coerce_timestamp(1_761_840_360_500.0), Some(1_761_840_360.5));
    }

    #[test]
    fn test_coerce_rejects_invalid() {
        assert_eq!(coerce_timestamp(0.0), None);
        assert_eq!(coerce_timestamp(-5.0), None);
        assert_eq!(coerce_timestamp(f64::NAN), None);
        assert_eq!(coerce_timestamp(f64::INFINITY), None);
    }

    #[test]
    fn test_isoformat() {
        assert_eq!(isoformat(0.0), "1970-01-01T00:00:00.000Z");
        assert_eq!(isoformat(1_761_840_360.0), "2025-10-30T16:06:00.000Z");
    }

    #[test]
    fn test_isoformat_fractional() {
        assert!(isoformat(1_761_840_360.5).contains(".500Z"));
    }

    use proptest::prelude::*;

    proptest! {
        /// Coercion is idempotent: once in seconds, a timestamp passes
        /// through unchanged.
        #[test]
        fn prop_coerce_is_idempotent(raw in 1.0f64..9e14) {
            let once = coerce_timestamp(raw).unwrap();
            prop_assert_eq!(coerce_timestamp(once), Some(once));
        }
    }
}

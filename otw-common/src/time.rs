//! Timestamp utilities

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage (RFC 3339, whole seconds, `Z` suffix)
pub fn to_storage(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a timestamp previously written with [`to_storage`]
pub fn from_storage(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Internal(format!("Invalid stored timestamp {:?}: {}", value, e)))
}

/// Parse an upstream timestamp string
///
/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS` (taken as UTC, with or
/// without fractional seconds) and integer epoch milliseconds.
pub fn parse_upstream_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    value.parse::<i64>().ok().and_then(from_epoch_millis)
}

/// Convert epoch milliseconds to a UTC timestamp
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_storage_round_trip_drops_subseconds() {
        let ts = Utc.with_ymd_and_hms(2025, 10, 21, 14, 0, 0).unwrap();
        let stored = to_storage(&ts);
        assert_eq!(stored, "2025-10-21T14:00:00Z");
        assert_eq!(from_storage(&stored).unwrap(), ts);
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let parsed = parse_upstream_timestamp("2025-10-21T10:00:00-04:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 10, 21, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_as_utc() {
        let parsed = parse_upstream_timestamp("2025-10-21T14:00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 10, 21, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_epoch_millis() {
        let parsed = parse_upstream_timestamp("1761055200000").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 10, 21, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_upstream_timestamp("next tuesday").is_none());
        assert!(parse_upstream_timestamp("   ").is_none());
    }
}

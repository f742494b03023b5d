//! Timestamp helpers shared by job records and progress events.

use chrono::{DateTime, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// Format: `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`
///
/// # Examples
///
/// ```
/// use incidentflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_iso8601(&Utc::now())
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats a timestamp as ISO 8601 string.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns `now` unless it is earlier than `previous`.
///
/// Wall clocks can step backwards; record timestamps must not.
#[must_use]
pub fn monotonic_after(previous: Timestamp, now: Timestamp) -> Timestamp {
    if now < previous {
        previous
    } else {
        now
    }
}

/// Seconds elapsed between two timestamps, never negative.
#[must_use]
pub fn elapsed_seconds(start: &Timestamp, end: &Timestamp) -> f64 {
    let millis = (*end - *start).num_milliseconds().max(0);
    millis as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }

    #[test]
    fn test_format_iso8601() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap();
        assert_eq!(format_iso8601(&dt), "2024-03-09T14:30:00.000000+00:00");
    }

    #[test]
    fn test_monotonic_after_never_goes_back() {
        let earlier = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap();
        let later = earlier + Duration::seconds(5);

        assert_eq!(monotonic_after(earlier, later), later);
        assert_eq!(monotonic_after(later, earlier), later);
    }

    #[test]
    fn test_elapsed_seconds() {
        let start = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap();
        let end = start + Duration::milliseconds(2500);

        assert!((elapsed_seconds(&start, &end) - 2.5).abs() < f64::EPSILON);
        assert!(elapsed_seconds(&end, &start).abs() < f64::EPSILON);
    }
}

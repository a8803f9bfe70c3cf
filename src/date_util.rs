use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

/// Seconds between the Unix epoch and Apple's Core Data reference date
/// (2001-01-01T00:00:00Z).
pub const APPLE_EPOCH_OFFSET: i64 = 978_307_200;

/// Convert a Core Data timestamp (seconds since 2001-01-01 UTC) to UTC.
pub fn apple_timestamp_to_datetime(apple_ts: f64) -> Option<DateTime<Utc>> {
    let unix = apple_ts + APPLE_EPOCH_OFFSET as f64;
    let secs = unix.floor();
    let nanos = ((unix - secs) * 1e9).round() as u32;
    Utc.timestamp_opt(secs as i64, nanos.min(999_999_999)).single()
}

/// Convert a UTC timestamp to Core Data seconds.
pub fn datetime_to_apple_timestamp(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9
        - APPLE_EPOCH_OFFSET as f64
}

/// Midnight UTC at the start of `date`.
pub fn start_of_day_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// `now - days`, used for the default look-back window.
pub fn days_ago(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(days))
}

/// Human-readable duration: `1 hour 2 minutes 5 seconds`, `0 seconds`.
pub fn format_duration(total_seconds: i64) -> String {
    if total_seconds <= 0 {
        return "0 seconds".to_string();
    }

    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("{n} {unit}")
        } else {
            format!("{n} {unit}s")
        }
    };

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(plural(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(plural(minutes, "minute"));
    }
    if seconds > 0 {
        parts.push(plural(seconds, "second"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apple_epoch_round_trip() {
        let reference = apple_timestamp_to_datetime(0.0).unwrap();
        assert_eq!(reference, Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap());

        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let apple = datetime_to_apple_timestamp(dt);
        assert_eq!(apple, 727_007_400.0);
        assert_eq!(apple_timestamp_to_datetime(apple).unwrap(), dt);
    }

    #[test]
    fn test_apple_timestamp_fractional_seconds() {
        let dt = apple_timestamp_to_datetime(1.5).unwrap();
        assert_eq!(dt.timestamp(), APPLE_EPOCH_OFFSET + 1);
        assert_eq!(dt.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0 seconds");
        assert_eq!(format_duration(1), "1 second");
        assert_eq!(format_duration(45), "45 seconds");
        assert_eq!(format_duration(65), "1 minute 5 seconds");
        assert_eq!(format_duration(120), "2 minutes");
        assert_eq!(format_duration(3600), "1 hour");
        assert_eq!(format_duration(3725), "1 hour 2 minutes 5 seconds");
        assert_eq!(format_duration(7260), "2 hours 1 minute");
    }

    #[test]
    fn test_start_of_day_utc() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(
            start_of_day_utc(d),
            Utc.with_ymd_and_hms(2025, 3, 9, 0, 0, 0).unwrap()
        );
    }
}

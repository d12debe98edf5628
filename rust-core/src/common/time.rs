//! Simple time helpers used by multiple services.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Formats accepted for raw timestamp columns, tried in order.
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

pub const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Current wall-clock time in UTC.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a raw timestamp cell into epoch milliseconds; `None` when unparseable.
pub fn parse_millis(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Convert epoch milliseconds back into a UTC datetime.
pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_supported_formats() {
        let full = parse_millis("2017-10-02 10:56:33").unwrap();
        let iso = parse_millis("2017-10-02T10:56:33").unwrap();
        assert_eq!(full, iso);
        let dt = from_millis(full).unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2017, 10, 2));
        assert_eq!((dt.hour(), dt.minute()), (10, 56));

        let date_only = parse_millis("2017-10-02").unwrap();
        assert_eq!(full - date_only, ((10 * 60 + 56) * 60 + 33) * 1000);
    }

    #[test]
    fn garbage_and_blank_are_none() {
        assert_eq!(parse_millis("not a date"), None);
        assert_eq!(parse_millis("   "), None);
        assert_eq!(parse_millis("2017-13-40 00:00:00"), None);
    }
}

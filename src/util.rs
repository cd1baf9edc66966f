use chrono::TimeZone;

const NAIVE_FORMATS: &'static [&'static str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

const MICROS_PER_HOUR: f64 = 3_600_000_000.0;

/// Parses a timestamp as written by the field controllers.
///
/// Timestamps ending in `Z` or carrying an explicit offset are absolute. Anything else is wall
/// clock time in `device_offset`, which is what the controllers' RTCs are set to.
pub fn parse_device_timestamp(
    raw: &str,
    device_offset: chrono::FixedOffset,
) -> Option<chrono::DateTime<chrono::Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(t) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&chrono::Utc));
    }

    if let Some(utc) = raw.strip_suffix('Z') {
        return NAIVE_FORMATS
            .iter()
            .find_map(|f| chrono::NaiveDateTime::parse_from_str(utc, f).ok())
            .map(|naive| chrono::Utc.from_utc_datetime(&naive));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|f| chrono::NaiveDateTime::parse_from_str(raw, f).ok())
        .and_then(|naive| device_offset.from_local_datetime(&naive).single())
        .map(|t| t.with_timezone(&chrono::Utc))
}

/// Parses `+05:30`, `-0300`, `+05` or `Z`/`UTC`.
pub fn parse_utc_offset(raw: &str) -> Option<chrono::FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return chrono::FixedOffset::east_opt(0);
    }

    let (sign, rest) = match raw.chars().next()? {
        '+' => (1, &raw[1..]),
        '-' => (-1, &raw[1..]),
        _ => return None,
    };
    let digits = rest.replace(':', "");
    if (digits.len() != 2 && digits.len() != 4) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = if digits.len() == 4 {
        digits[2..].parse().ok()?
    } else {
        0
    };
    if minutes >= 60 {
        return None;
    }

    chrono::FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Formats an instant for people reading a report, e.g. `2024-03-01 14:05 IST`.
pub fn format_for_display(
    t: chrono::DateTime<chrono::Utc>,
    offset: chrono::FixedOffset,
    zone: &str,
) -> String {
    format!(
        "{} {}",
        t.with_timezone(&offset).format("%Y-%m-%d %H:%M"),
        zone
    )
}

/// Converts a (possibly fractional) number of hours into a duration, rounded to the microsecond.
pub fn hours(h: f64) -> chrono::Duration {
    chrono::Duration::microseconds((h * MICROS_PER_HOUR).round() as i64)
}

pub fn as_hours(d: chrono::Duration) -> f64 {
    match d.num_microseconds() {
        Some(us) => us as f64 / MICROS_PER_HOUR,
        None => d.num_milliseconds() as f64 / (MICROS_PER_HOUR / 1000.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ist() -> chrono::FixedOffset {
        parse_utc_offset("+05:30").unwrap()
    }

    #[test]
    fn naive_timestamps_are_device_local() {
        let t = parse_device_timestamp("2024-03-01 12:00", ist()).unwrap();
        assert_eq!(t, chrono::Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 0).unwrap());

        let t = parse_device_timestamp("2024-03-01T12:00:30", ist()).unwrap();
        assert_eq!(t, chrono::Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 30).unwrap());
    }

    #[test]
    fn zulu_and_offset_timestamps_are_absolute() {
        let expected = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            parse_device_timestamp("2024-03-01T12:00:00Z", ist()),
            Some(expected)
        );
        assert_eq!(
            parse_device_timestamp("2024-03-01T12:00:00.250Z", ist()),
            Some(expected + chrono::Duration::milliseconds(250))
        );
        assert_eq!(
            parse_device_timestamp("2024-03-01T17:30:00+05:30", ist()),
            Some(expected)
        );
    }

    #[test]
    fn garbage_timestamps_are_rejected() {
        assert_eq!(parse_device_timestamp("", ist()), None);
        assert_eq!(parse_device_timestamp("yesterday", ist()), None);
        assert_eq!(parse_device_timestamp("2024-13-01 12:00", ist()), None);
    }

    #[test]
    fn offsets() {
        assert_eq!(parse_utc_offset("+05:30").unwrap().local_minus_utc(), 19800);
        assert_eq!(parse_utc_offset("-0300").unwrap().local_minus_utc(), -10800);
        assert_eq!(parse_utc_offset("+01").unwrap().local_minus_utc(), 3600);
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_utc_offset("05:30"), None);
        assert_eq!(parse_utc_offset("+05:75"), None);
        assert_eq!(parse_utc_offset("+5:3"), None);
    }

    #[test]
    fn display_uses_the_given_zone() {
        let t = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 0).unwrap();
        assert_eq!(format_for_display(t, ist(), "IST"), "2024-03-01 12:00 IST");
    }

    #[test]
    fn hour_conversions_are_exact_for_whole_hours() {
        assert_eq!(hours(2.0), chrono::Duration::hours(2));
        assert_eq!(hours(0.5), chrono::Duration::minutes(30));
        assert_eq!(as_hours(chrono::Duration::minutes(90)), 1.5);
    }
}

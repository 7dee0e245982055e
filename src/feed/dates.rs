use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Strict RFC 3339 timestamps, as Atom requires.
pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// Zoned formats seen in the wild that neither RFC parser accepts.
const ZONED_FORMATS: &[&str] = &[
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M %z",
    "%d %B %Y %H:%M:%S %z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M:%S %z",
];

// Zone-less formats, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Publication date of an RSS item: RFC 3339 first, then RFC 2822, then a
/// handful of common deviations. Unparseable values yield `None`.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(dt) = parse_rfc3339(value) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }

    // Drop a leading weekday, which is often misspelled or inconsistent.
    let value = match value.split_once(',') {
        Some((_, rest)) => rest.trim(),
        None => value,
    };
    let normalized = normalize_zone(value);

    for format in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// "Z", "UT", "GMT" and "UTC" suffixes become a numeric offset.
fn normalize_zone(value: &str) -> String {
    for suffix in [" UTC", " GMT", " UT", "Z"] {
        if let Some(stripped) = value.strip_suffix(suffix) {
            let sep = if suffix == "Z" { "" } else { " " };
            return format!("{stripped}{sep}+0000");
        }
    }
    value.to_string()
}

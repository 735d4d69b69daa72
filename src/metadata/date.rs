//! Capture date parsing for loosely formatted, site-reported timestamps.
//!
//! Handles "Just now", "N mins"/"N hrs", "Today"/"Yesterday" (optionally
//! "at 9:41 PM"), month-day strings with or without a year, and ISO dates.

use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

use crate::resolver::compile_static_regex;

/// EXIF `DateTime*` layout.
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

static RELATIVE_AGO: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)^(\d+)\s*(m|min|mins|minutes?|h|hr|hrs|hours?)(\s+ago)?$")
});

static LEADING_WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)^(monday|tuesday|wednesday|thursday|friday|saturday|sunday),?\s+",
    )
});

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%B %d, %Y at %I:%M %p",
    "%B %d %Y at %I:%M %p",
    "%d %B %Y at %H:%M",
    "%B %d, %Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%B %d, %Y", "%B %d %Y", "%d %B %Y", "%Y/%m/%d"];

/// Parses a site-reported date relative to `now`.
///
/// Returns `None` when no supported layout matches. A date without a time of
/// day resolves to midnight; bare "Today"/"Yesterday" keep `now`'s time.
#[must_use]
pub fn parse_capture_date(raw: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();

    if lower == "just now" || lower == "now" {
        return Some(now);
    }

    if let Some(caps) = RELATIVE_AGO.captures(&text) {
        let amount: i64 = caps[1].parse().ok()?;
        let unit = caps[2].to_lowercase();
        let delta = if unit.starts_with('h') {
            Duration::try_hours(amount)?
        } else {
            Duration::try_minutes(amount)?
        };
        return now.checked_sub_signed(delta);
    }

    for (token, days_back) in [("today", 0), ("yesterday", 1)] {
        if let Some(rest) = lower.strip_prefix(token) {
            let day = now.date() - Duration::days(days_back);
            let rest = rest.trim();
            if rest.is_empty() {
                return Some(day.and_time(now.time()));
            }
            let time = parse_time_of_day(rest.strip_prefix("at").unwrap_or(rest).trim())?;
            return Some(day.and_time(time));
        }
    }

    let text = LEADING_WEEKDAY.replace(&text, "").into_owned();

    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&text, format) {
            return Some(parsed);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&text, format) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }

    // Month-day strings from the current year omit the year.
    let with_year = format!("{text} {}", now.year());
    if let Ok(parsed) = NaiveDateTime::parse_from_str(&with_year, "%B %d at %I:%M %p %Y") {
        return Some(parsed);
    }
    if let Ok(date) = NaiveDate::parse_from_str(&with_year, "%B %d %Y") {
        return Some(date.and_time(NaiveTime::MIN));
    }

    None
}

fn parse_time_of_day(text: &str) -> Option<NaiveTime> {
    ["%I:%M %p", "%I:%M%p", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
}

/// Formats a timestamp for EXIF `DateTimeOriginal`.
#[must_use]
pub fn format_exif_datetime(at: NaiveDateTime) -> String {
    at.format(EXIF_DATETIME_FORMAT).to_string()
}

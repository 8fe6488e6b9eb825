//! Article identity and recency helpers.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALNUM_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("valid id separator regex"));

/// Epoch values above this are taken to be milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Stable id for articles whose format carries none: source name plus the
/// link (or the title when there is no link), with every run of
/// non-alphanumeric characters collapsed to `-`.
pub fn derive_article_id(source_name: &str, link: &str, title: &str) -> String {
    let key = if link.trim().is_empty() { title } else { link };
    let raw = format!("{}-{}", source_name, key.trim());
    NON_ALNUM_RUN
        .replace_all(&raw, "-")
        .trim_matches('-')
        .to_string()
}

/// Title key used for cross-source deduplication.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

pub fn relative_time_label(published_at: i64, now: DateTime<Utc>) -> String {
    let elapsed = now.timestamp().saturating_sub(published_at);

    if elapsed < MINUTE {
        return "Just now".to_string();
    }
    if elapsed < HOUR {
        return plural(elapsed / MINUTE, "min");
    }
    if elapsed < DAY {
        return plural(elapsed / HOUR, "hour");
    }
    if elapsed < 7 * DAY {
        return plural(elapsed / DAY, "day");
    }

    DateTime::<Utc>::from_timestamp(published_at, 0)
        .map(|dt| dt.format("%b %-d, %Y").to_string())
        .unwrap_or_default()
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", count, unit)
    }
}

fn normalize_epoch(value: i64) -> i64 {
    if value > MILLIS_THRESHOLD {
        value / 1000
    } else {
        value
    }
}

/// Normalize an epoch and reject values chrono cannot represent as a date.
pub fn checked_epoch(value: i64) -> Option<i64> {
    let seconds = normalize_epoch(value);
    DateTime::<Utc>::from_timestamp(seconds, 0).map(|_| seconds)
}

/// Parse a date as found in feeds: bare epoch digits, RFC 2822 or RFC 3339.
pub fn parse_date(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(epoch) = value.parse::<i64>() {
        return checked_epoch(epoch);
    }

    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.timestamp())
        .ok()
}

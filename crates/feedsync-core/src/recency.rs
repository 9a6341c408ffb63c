//! Recency window filtering.
//!
//! A record is "recent" when its storage write happened no more than `window`
//! before `now`. Records without a parseable timestamp are never recent.
//!
//! # Accepted timestamp formats
//!
//! - RFC 3339 with offset: `2026-02-21T10:00:00Z`, `2026-02-21T10:00:00.123+01:00`
//! - Naive ISO 8601, read as UTC: `2026-02-21T10:00:00`, `2026-02-21T10:00:00.123456`
//! - Naive with a space separator, read as UTC: `2026-02-21 10:00:00`

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

/// Default recency window: 24 hours.
pub const DEFAULT_WINDOW: TimeDelta = TimeDelta::hours(24);

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a timestamp string into UTC, or `None` when it is not a valid timestamp.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Whether `last_modified` falls inside `window` ending at `now`.
///
/// Returns `false` for an absent or unparseable timestamp, and `true` iff
/// `now - last_modified <= window`. Timestamps slightly in the future (clock
/// skew between storage and this host) count as recent.
pub fn is_recent(last_modified: Option<&str>, now: DateTime<Utc>, window: TimeDelta) -> bool {
    last_modified
        .and_then(parse_timestamp)
        .is_some_and(|ts| is_recent_at(ts, now, window))
}

/// [`is_recent`] for an already-parsed timestamp.
pub fn is_recent_at(ts: DateTime<Utc>, now: DateTime<Utc>, window: TimeDelta) -> bool {
    now.signed_duration_since(ts) <= window
}

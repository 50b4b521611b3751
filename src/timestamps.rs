// Store timestamps are `timestamp without time zone` columns holding UTC.
// They come back without an offset suffix, so they must never be read as local time.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Offset used for all rendered times (Asia/Dhaka, which has no DST).
pub const DEFAULT_DISPLAY_OFFSET_MINUTES: i32 = 6 * 60;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a store timestamp, treating a missing zone suffix as UTC.
pub fn parse_store_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let raw = raw.trim();
    if has_zone_suffix(raw) {
        // Postgres may emit "+06" without minutes; rfc3339 wants "+06:00".
        let normalized = normalize_short_offset(raw);
        return DateTime::parse_from_rfc3339(&normalized).map(|dt| dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, NAIVE_FORMATS[0])
        .or_else(|_| NaiveDateTime::parse_from_str(raw, NAIVE_FORMATS[1]))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn has_zone_suffix(raw: &str) -> bool {
    if raw.ends_with('Z') || raw.ends_with('z') {
        return true;
    }
    // Only look after the date part so the date's own dashes don't count.
    match raw.find(['T', ' ']) {
        Some(idx) => raw[idx..].contains(['+', '-']),
        None => false,
    }
}

fn normalize_short_offset(raw: &str) -> String {
    let mut normalized = raw.replacen(' ', "T", 1);
    let bytes = normalized.as_bytes();
    let len = bytes.len();
    if len >= 3
        && (bytes[len - 3] == b'+' || bytes[len - 3] == b'-')
        && bytes[len - 2].is_ascii_digit()
        && bytes[len - 1].is_ascii_digit()
    {
        normalized.push_str(":00");
    }
    normalized
}

/// Renders instants in one fixed zone for every user.
#[derive(Debug, Clone, Copy)]
pub struct TimeFormatter {
    offset: FixedOffset,
}

impl TimeFormatter {
    pub fn new(offset_minutes: i32) -> Self {
        let offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                log::warn!("Display offset {} minutes out of range, using UTC", offset_minutes);
                Utc.fix()
            });
        TimeFormatter { offset }
    }

    /// Two-digit hour and minute with AM/PM, e.g. `04:00 PM`.
    pub fn format_time(&self, at: &DateTime<Utc>) -> String {
        at.with_timezone(&self.offset).format("%I:%M %p").to_string()
    }

    /// Parse-then-format convenience for raw store strings.
    pub fn format_store_timestamp(&self, raw: &str) -> Option<String> {
        parse_store_timestamp(raw).ok().map(|at| self.format_time(&at))
    }
}

impl Default for TimeFormatter {
    fn default() -> Self {
        TimeFormatter::new(DEFAULT_DISPLAY_OFFSET_MINUTES)
    }
}

pub(crate) fn deserialize_store_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_store_timestamp(&raw).map_err(serde::de::Error::custom)
}

pub(crate) fn serialize_store_timestamp<S>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&at.to_rfc3339())
}

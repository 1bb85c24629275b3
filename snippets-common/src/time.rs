//! Timestamp utilities

use chrono::{DateTime, Duration, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Whether `stamp` is still inside a validity window ending `window` after it
///
/// Stamps in the future are treated as fresh (clock skew between sessions).
pub fn is_within_window(stamp: DateTime<Utc>, window: Duration, at: DateTime<Utc>) -> bool {
    at < stamp + window
}

/// Parse an RFC 3339 timestamp as stored in the settings table
pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

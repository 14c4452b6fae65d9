//! Small shared helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Start of the UTC day containing `timestamp_ms`, in milliseconds.
///
/// Used by the risk gate's rolling daily counters.
#[must_use]
pub fn utc_day_start_millis(timestamp_ms: u64) -> u64 {
    const DAY_MS: u64 = 24 * 60 * 60 * 1000;
    timestamp_ms - (timestamp_ms % DAY_MS)
}

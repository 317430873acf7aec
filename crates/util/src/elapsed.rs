//! # Elapsed Duration Formatting
//!
//! This module formats idle durations for monitoring views, bucketing the
//! precision by magnitude so dashboards stay scannable.

use chrono::Duration;

/// Formats an elapsed duration for display.
///
/// Durations of a day or more render as `"{d}d {h}h"`, an hour or more as
/// `"{h}h {m}m"`, and anything shorter as `"{m}m"`. Negative durations are
/// treated as zero.
///
/// # Example
/// ```rust
/// use chrono::Duration;
/// use runbook_util::elapsed::format_elapsed;
///
/// assert_eq!(format_elapsed(Duration::hours(25)), "1d 1h");
/// assert_eq!(format_elapsed(Duration::minutes(95)), "1h 35m");
/// assert_eq!(format_elapsed(Duration::minutes(42)), "42m");
/// ```
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_minutes = elapsed.num_minutes().max(0);
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;

    if days >= 1 {
        format!("{days}d {hours}h")
    } else if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_bucket_drops_minutes() {
        assert_eq!(format_elapsed(Duration::hours(25)), "1d 1h");
        assert_eq!(format_elapsed(Duration::minutes(24 * 60 + 59)), "1d 0h");
        assert_eq!(format_elapsed(Duration::days(3) + Duration::hours(7)), "3d 7h");
    }

    #[test]
    fn hour_bucket_keeps_minutes() {
        assert_eq!(format_elapsed(Duration::hours(23)), "23h 0m");
        assert_eq!(format_elapsed(Duration::minutes(95)), "1h 35m");
    }

    #[test]
    fn minute_bucket_below_one_hour() {
        assert_eq!(format_elapsed(Duration::minutes(42)), "42m");
        assert_eq!(format_elapsed(Duration::seconds(59)), "0m");
        assert_eq!(format_elapsed(Duration::zero()), "0m");
    }

    #[test]
    fn negative_durations_clamp_to_zero() {
        assert_eq!(format_elapsed(Duration::minutes(-5)), "0m");
    }

    #[test]
    fn exact_day_boundary() {
        assert_eq!(format_elapsed(Duration::hours(24)), "1d 0h");
    }
}

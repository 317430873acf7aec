//! Run-staleness computation for operational monitoring.
//!
//! A run stalls when its in-flight step sees no activity for longer than the
//! threshold. Nothing is stored: monitoring views recompute against the latest
//! run snapshot on every poll.

use chrono::{DateTime, Duration, Utc};
use runbook_types::ActiveRun;
use runbook_util::format_elapsed;

/// Hours of inactivity after which a run counts as stalled.
pub const DEFAULT_STALL_THRESHOLD_HOURS: i64 = 24;

/// Idle-time verdict for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallInfo {
    /// Time since the last log entry (or the run start when nothing has
    /// completed yet). Never negative.
    pub elapsed: Duration,
    pub is_stalled: bool,
    /// Human-readable form of `elapsed` for dashboards.
    pub display: String,
}

/// Computes the stall verdict for a run at the given instant using the
/// product-default 24-hour threshold.
pub fn compute_stall_info(run: &ActiveRun, now: DateTime<Utc>) -> StallInfo {
    compute_stall_info_with_threshold(run, now, Duration::hours(DEFAULT_STALL_THRESHOLD_HOURS))
}

/// Computes the stall verdict with a caller-chosen threshold.
pub fn compute_stall_info_with_threshold(run: &ActiveRun, now: DateTime<Utc>, threshold: Duration) -> StallInfo {
    let last_activity = run.last_activity_at();
    let elapsed = (now - last_activity).max(Duration::zero());

    StallInfo {
        elapsed,
        is_stalled: elapsed > threshold,
        display: format_elapsed(elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use runbook_types::{StepLog, StepOutcome};
    use serde_json::Value;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()
    }

    fn run_started_at(started_at: DateTime<Utc>) -> ActiveRun {
        ActiveRun::new("run-1", "proc-1", started_at)
    }

    #[test]
    fn a_run_idle_for_25_hours_is_stalled() {
        let run = run_started_at(base_time());
        let info = compute_stall_info(&run, base_time() + Duration::hours(25));

        assert!(info.is_stalled);
        assert_eq!(info.display, "1d 1h");
    }

    #[test]
    fn a_run_idle_for_23_hours_is_not_stalled() {
        let run = run_started_at(base_time());
        let info = compute_stall_info(&run, base_time() + Duration::hours(23));

        assert!(!info.is_stalled);
        assert_eq!(info.display, "23h 0m");
    }

    #[test]
    fn exactly_24_hours_is_not_yet_stalled() {
        let run = run_started_at(base_time());
        let info = compute_stall_info(&run, base_time() + Duration::hours(24));

        assert!(!info.is_stalled);
    }

    #[test]
    fn the_latest_log_resets_the_clock() {
        let mut run = run_started_at(base_time());
        run.logs.push(StepLog {
            step_id: "intake".into(),
            output: Value::Null,
            timestamp: base_time() + Duration::hours(30),
            outcome: StepOutcome::Success,
        });
        run.current_step_index = 1;

        let info = compute_stall_info(&run, base_time() + Duration::hours(31));

        assert!(!info.is_stalled);
        assert_eq!(info.display, "1h 0m");
    }

    #[test]
    fn sub_hour_idle_times_show_minutes() {
        let run = run_started_at(base_time());
        let info = compute_stall_info(&run, base_time() + Duration::minutes(42));

        assert_eq!(info.display, "42m");
        assert!(!info.is_stalled);
    }

    #[test]
    fn clock_skew_clamps_to_zero() {
        let run = run_started_at(base_time());
        let info = compute_stall_info(&run, base_time() - Duration::minutes(5));

        assert_eq!(info.elapsed, Duration::zero());
        assert_eq!(info.display, "0m");
        assert!(!info.is_stalled);
    }

    #[test]
    fn custom_threshold_applies() {
        let run = run_started_at(base_time());
        let info = compute_stall_info_with_threshold(&run, base_time() + Duration::hours(5), Duration::hours(4));

        assert!(info.is_stalled);
    }
}

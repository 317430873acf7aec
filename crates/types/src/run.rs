//! Live run state: one [`ActiveRun`] per execution of a procedure, with an
//! append-only log of completed steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Lifecycle status of an active run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run has remaining steps and no blocking condition.
    InProgress,
    /// An operator raised a blocking condition; the index does not move until
    /// the run is resumed or advanced.
    Flagged,
    /// Every step has a log entry. Terminal.
    Completed,
}

/// Outcome recorded when a step completes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    /// The step completed while a blocking condition was open.
    Flagged,
}

/// Immutable record of one completed step within a run. Logs are only ever
/// appended, never edited or removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepLog {
    /// Identifier of the step this entry completes.
    pub step_id: String,
    /// Arbitrary nested value produced by the step.
    pub output: JsonValue,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
    pub outcome: StepOutcome,
}

/// One live execution instance of a procedure.
///
/// Invariants: `logs.len() == current_step_index` (one log per completed step,
/// no gaps) and `current_step_index <= steps.len()` of the owning procedure.
/// The run-state operations in the engine are the only code that mutates the
/// index or the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveRun {
    pub id: String,
    /// Identifier of the procedure this run executes.
    pub procedure_id: String,
    /// Index of the in-flight step; equals `logs.len()` at all times.
    pub current_step_index: usize,
    pub status: RunStatus,
    /// When the run was started.
    pub started_at: DateTime<Utc>,
    /// Append-only log of completed steps.
    #[serde(default)]
    pub logs: Vec<StepLog>,
    /// Identity reference (id or email) of whoever currently works the
    /// in-flight step; mutable independently of the index.
    #[serde(default)]
    pub current_assignee: Option<String>,
    /// Reason supplied when the run was flagged; cleared on resume/advance.
    #[serde(default)]
    pub flag_reason: Option<String>,
    /// Optimistic-concurrency token managed by the run store.
    #[serde(default)]
    pub version: u64,
}

impl ActiveRun {
    /// Creates a fresh run positioned at the first step.
    pub fn new(id: impl Into<String>, procedure_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            procedure_id: procedure_id.into(),
            current_step_index: 0,
            status: RunStatus::InProgress,
            started_at,
            logs: Vec::new(),
            current_assignee: None,
            flag_reason: None,
            version: 0,
        }
    }

    /// Timestamp of the most recent activity: the latest log entry, or the
    /// start of the run when nothing has completed yet.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.logs
            .last()
            .map(|log| log.timestamp.max(self.started_at))
            .unwrap_or(self.started_at)
    }
}

/// Presentation identity resolved from an assignee reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayIdentity {
    pub id: String,
    /// Name shown in run views.
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, 0, 0).unwrap()
    }

    #[test]
    fn new_run_starts_at_the_first_step() {
        let run = ActiveRun::new("run-1", "proc-1", at(9));
        assert_eq!(run.current_step_index, 0);
        assert_eq!(run.status, RunStatus::InProgress);
        assert!(run.logs.is_empty());
        assert_eq!(run.version, 0);
    }

    #[test]
    fn last_activity_prefers_latest_log_over_start() {
        let mut run = ActiveRun::new("run-1", "proc-1", at(9));
        assert_eq!(run.last_activity_at(), at(9));

        run.logs.push(StepLog {
            step_id: "intake".into(),
            output: json!({"name": "Ana"}),
            timestamp: at(11),
            outcome: StepOutcome::Success,
        });
        run.current_step_index = 1;
        assert_eq!(run.last_activity_at(), at(11));
    }

    #[test]
    fn last_activity_never_precedes_run_start() {
        // A log stamped before started_at can only come from clock skew.
        let mut run = ActiveRun::new("run-1", "proc-1", at(12));
        run.logs.push(StepLog {
            step_id: "intake".into(),
            output: JsonValue::Null,
            timestamp: at(10),
            outcome: StepOutcome::Success,
        });
        run.current_step_index = 1;
        assert_eq!(run.last_activity_at(), at(12));
    }

    #[test]
    fn run_serializes_with_snake_case_status() {
        let run = ActiveRun::new("run-1", "proc-1", at(9));
        let value = serde_json::to_value(&run).expect("serialize run");
        assert_eq!(value["status"], "in_progress");
        assert_eq!(value["current_step_index"], 0);
    }
}

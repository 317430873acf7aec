//! Run state transitions.
//!
//! These operations are the only code that mutates a run's index, log, or
//! status. Each call is a single synchronous computation; persistence happens
//! around it, with the store's compare-and-set rejecting a stale write when
//! two completions of the same in-flight step race (see
//! [`crate::store::RunStore`]).
//!
//! `advance` owns the index and the log; `flag`/`resume` own the status and
//! reason; `reassign` owns the assignee. The field sets are disjoint, so a
//! reassignment may be applied concurrently with an in-flight advance under
//! per-field last-write-wins semantics.

use chrono::{DateTime, Utc};
use runbook_types::{ActiveRun, RunStatus, Step, StepLog, StepOutcome};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

/// Errors surfaced by run state transitions.
///
/// These are invariant violations for the caller to investigate, never
/// silently clamped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunStateError {
    /// The run's index is at or beyond the procedure's step count.
    #[error("step index {index} is out of range for a procedure with {step_count} steps")]
    StepIndexOutOfRange { index: usize, step_count: usize },
    /// The requested operation is not valid from the run's current status.
    #[error("cannot {action} a run in the {status:?} state")]
    InvalidTransition { action: &'static str, status: RunStatus },
}

/// Completes the in-flight step: appends exactly one log entry and moves the
/// index forward.
///
/// The run becomes `Completed` exactly when the new index reaches the step
/// count. A prior `Flagged` status is cleared back to `InProgress` — advancing
/// implies the blocking condition was resolved.
pub fn advance_run(steps: &[Step], run: &mut ActiveRun, output: Value, outcome: StepOutcome, completed_at: DateTime<Utc>) -> Result<(), RunStateError> {
    if run.current_step_index >= steps.len() {
        return Err(RunStateError::StepIndexOutOfRange {
            index: run.current_step_index,
            step_count: steps.len(),
        });
    }

    let step = &steps[run.current_step_index];
    run.logs.push(StepLog {
        step_id: step.id.clone(),
        output,
        timestamp: completed_at,
        outcome,
    });
    run.current_step_index += 1;
    run.flag_reason = None;
    run.status = if run.current_step_index == steps.len() {
        RunStatus::Completed
    } else {
        RunStatus::InProgress
    };

    debug!(run_id = %run.id, step_id = %step.id, index = run.current_step_index, "run advanced");
    if run.status == RunStatus::Completed {
        info!(run_id = %run.id, "run completed");
    }
    Ok(())
}

/// Raises a blocking condition on the in-flight step without moving the index
/// or touching the log.
pub fn flag_run(run: &mut ActiveRun, reason: impl Into<String>) -> Result<(), RunStateError> {
    if run.status != RunStatus::InProgress {
        return Err(RunStateError::InvalidTransition {
            action: "flag",
            status: run.status,
        });
    }

    run.status = RunStatus::Flagged;
    run.flag_reason = Some(reason.into());
    info!(run_id = %run.id, "run flagged");
    Ok(())
}

/// Clears a blocking condition, returning the run to `InProgress` without
/// altering index or logs.
pub fn resume_run(run: &mut ActiveRun) -> Result<(), RunStateError> {
    if run.status != RunStatus::Flagged {
        return Err(RunStateError::InvalidTransition {
            action: "resume",
            status: run.status,
        });
    }

    run.status = RunStatus::InProgress;
    run.flag_reason = None;
    info!(run_id = %run.id, "run resumed");
    Ok(())
}

/// Hands the in-flight step to a different assignee. Touches the assignee
/// field only — never index, logs, or status.
pub fn reassign_run(run: &mut ActiveRun, new_assignee: impl Into<String>) -> Result<(), RunStateError> {
    if run.status == RunStatus::Completed {
        return Err(RunStateError::InvalidTransition {
            action: "reassign",
            status: run.status,
        });
    }

    run.current_assignee = Some(new_assignee.into());
    Ok(())
}

//! Asynchronous run driver that streams lifecycle events and responds to
//! pause/cancel controls.
//!
//! The driver converts the synchronous state-machine primitives into a
//! cooperative task: for each remaining step it rebuilds the output
//! environment, resolves the step's configuration, hands the literal values to
//! a [`StepExecutor`], and advances the run. The caller owns the event
//! receiver and issues control commands through the corresponding control
//! channel.
//!
//! A step whose configuration still contains unresolved references is never
//! handed to the executor; the stream ends with a failure naming the missing
//! data. An executor error flags the run with the error as the reason so an
//! operator can resume it later.

use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use runbook_types::{ActiveRun, Procedure, Step, StepOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::warn;

use crate::{
    environment::build_output_environment,
    resolve::resolve_config,
    run::state::{advance_run, flag_run},
    templates::collect_unresolved_references,
};

/// Status of the drive itself, as reported over the event stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriveStatus {
    Running,
    Paused,
    CancelRequested,
    Canceled,
    /// The run was flagged because a step executor returned an error.
    Flagged,
    /// The drive stopped on missing data or an invariant violation.
    Failed,
    Completed,
}

/// Lifecycle event emitted while driving a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RunEvent {
    RunStarted {
        at: DateTime<Utc>,
    },
    StepStarted {
        index: usize,
        step_id: String,
        title: String,
        started_at: DateTime<Utc>,
    },
    StepFinished {
        step_id: String,
        outcome: StepOutcome,
        output: Value,
        duration_ms: u64,
    },
    StatusChanged {
        status: DriveStatus,
        message: Option<String>,
    },
    RunCompleted {
        status: DriveStatus,
        finished_at: DateTime<Utc>,
        error: Option<String>,
    },
}

/// Control command accepted by an in-flight drive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunControl {
    Pause,
    Resume,
    Cancel,
}

/// Executes a single step against its resolved configuration.
///
/// Embedders provide concrete implementations that render forms, call
/// webhooks, or dispatch notifications. The returned value becomes the step's
/// logged output.
pub trait StepExecutor: Send + Sync {
    fn execute(&self, step: &Step, config: &Value) -> Result<Value>;
}

/// An executor that echoes the step it was given. Allows previews and tests
/// without external side effects.
pub struct NoopExecutor;

impl StepExecutor for NoopExecutor {
    fn execute(&self, step: &Step, config: &Value) -> Result<Value> {
        let mut output = serde_json::Map::new();
        output.insert("step".into(), Value::String(step.id.clone()));
        output.insert("config".into(), config.clone());
        Ok(Value::Object(output))
    }
}

/// Drives the remaining steps of a run to completion while emitting lifecycle
/// events.
pub async fn drive_run(
    procedure: &Procedure,
    run: &mut ActiveRun,
    executor: Arc<dyn StepExecutor>,
    mut control_rx: UnboundedReceiver<RunControl>,
    event_tx: UnboundedSender<RunEvent>,
) -> Result<()> {
    if event_tx.send(RunEvent::RunStarted { at: Utc::now() }).is_err() {
        return Ok(());
    }

    let mut control_state = ControlState::new();
    control_state.emit_status(&event_tx, DriveStatus::Running, None).ok();

    while run.current_step_index < procedure.steps.len() {
        drain_pending_commands(&mut control_state, &mut control_rx, &event_tx)?;
        if control_state.cancel_requested {
            break;
        }
        if control_state.paused {
            wait_for_resume(&mut control_state, &mut control_rx, &event_tx).await?;
            if control_state.cancel_requested {
                break;
            }
        }

        let index = run.current_step_index;
        let step = &procedure.steps[index];
        let environment = build_output_environment(&run.logs, &procedure.steps);
        let raw_config = step
            .config_value()
            .with_context(|| format!("failed to serialize configuration for step '{}'", step.id))?;

        let unresolved = collect_unresolved_references(&raw_config, &step.id, &environment);
        if !unresolved.is_empty() {
            let message = unresolved
                .iter()
                .map(|reference| reference.detail_message())
                .collect::<Vec<_>>()
                .join("; ");
            warn!(step_id = %step.id, "step blocked by unresolved references");
            control_state.emit_status(&event_tx, DriveStatus::Failed, Some(message.clone()))?;
            let _ = event_tx.send(RunEvent::RunCompleted {
                status: DriveStatus::Failed,
                finished_at: Utc::now(),
                error: Some(message),
            });
            return Ok(());
        }

        let resolved = resolve_config(&raw_config, &environment);
        let _ = event_tx.send(RunEvent::StepStarted {
            index,
            step_id: step.id.clone(),
            title: step.title.clone(),
            started_at: Utc::now(),
        });

        let started = Instant::now();
        match executor.execute(step, &resolved.config) {
            Ok(output) => {
                advance_run(&procedure.steps, run, output.clone(), StepOutcome::Success, Utc::now())?;
                let duration_ms = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
                let _ = event_tx.send(RunEvent::StepFinished {
                    step_id: step.id.clone(),
                    outcome: StepOutcome::Success,
                    output,
                    duration_ms,
                });
            }
            Err(error) => {
                let reason = error.to_string();
                warn!(step_id = %step.id, "step executor failed; flagging run");
                flag_run(run, reason.clone())?;
                control_state.emit_status(&event_tx, DriveStatus::Flagged, Some(reason.clone()))?;
                let _ = event_tx.send(RunEvent::RunCompleted {
                    status: DriveStatus::Flagged,
                    finished_at: Utc::now(),
                    error: Some(reason),
                });
                return Ok(());
            }
        }

        drain_pending_commands(&mut control_state, &mut control_rx, &event_tx)?;
        if control_state.cancel_requested {
            break;
        }
        if control_state.paused {
            wait_for_resume(&mut control_state, &mut control_rx, &event_tx).await?;
            if control_state.cancel_requested {
                break;
            }
        }
    }

    let completed_status = if control_state.cancel_requested {
        DriveStatus::Canceled
    } else {
        DriveStatus::Completed
    };
    let _ = event_tx.send(RunEvent::RunCompleted {
        status: completed_status,
        finished_at: Utc::now(),
        error: None,
    });
    Ok(())
}

fn drain_pending_commands(
    control_state: &mut ControlState,
    control_rx: &mut UnboundedReceiver<RunControl>,
    event_tx: &UnboundedSender<RunEvent>,
) -> Result<()> {
    loop {
        match control_rx.try_recv() {
            Ok(command) => control_state.process_command(command, event_tx)?,
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => break,
        }
    }
    Ok(())
}

async fn wait_for_resume(
    control_state: &mut ControlState,
    control_rx: &mut UnboundedReceiver<RunControl>,
    event_tx: &UnboundedSender<RunEvent>,
) -> Result<()> {
    while control_state.paused && !control_state.cancel_requested {
        match control_rx.recv().await {
            Some(command) => control_state.process_command(command, event_tx)?,
            None => break,
        }
    }
    Ok(())
}

struct ControlState {
    paused: bool,
    cancel_requested: bool,
}

impl ControlState {
    fn new() -> Self {
        Self {
            paused: false,
            cancel_requested: false,
        }
    }

    fn process_command(&mut self, command: RunControl, event_tx: &UnboundedSender<RunEvent>) -> Result<()> {
        match command {
            RunControl::Pause => {
                if !self.paused && !self.cancel_requested {
                    self.paused = true;
                    self.emit_status(event_tx, DriveStatus::Paused, None)?;
                }
            }
            RunControl::Resume => {
                if self.paused {
                    self.paused = false;
                    self.emit_status(event_tx, DriveStatus::Running, None)?;
                }
            }
            RunControl::Cancel => {
                if !self.cancel_requested {
                    self.cancel_requested = true;
                    self.paused = false;
                    self.emit_status(event_tx, DriveStatus::CancelRequested, Some("stopping after the current step".to_string()))?;
                }
            }
        }
        Ok(())
    }

    fn emit_status(&mut self, event_tx: &UnboundedSender<RunEvent>, status: DriveStatus, message: Option<String>) -> Result<()> {
        event_tx
            .send(RunEvent::StatusChanged { status, message })
            .map_err(|err| anyhow!("failed to emit drive status change: {}", err))
    }
}

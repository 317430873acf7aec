//! Output environment construction.
//!
//! A run's append-only log is turned into a lookup table keyed by every naming
//! convention authors actually use. Each logged step contributes three
//! aliases, inserted in this order (later entries overwrite earlier ones, so
//! when two steps declare the same output variable name the most recently
//! logged one wins):
//!
//! 1. `<output_variable_name or step_N>` → the step's raw output
//! 2. `step_N_output` → the same raw output (flattened convention)
//! 3. `step_N` → `{"output": <raw output>}` (nested-wrapper convention)
//!
//! Positions are 1-based, matching the `step_N` authoring convention.

use indexmap::IndexMap;
use runbook_types::{Step, StepLog};
use serde_json::{Value, json};

/// One logged output with enough step metadata to attribute provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedOutput {
    /// 1-based position of the step within its procedure.
    pub position: usize,
    pub step_id: String,
    pub step_title: String,
    /// The step's raw output value.
    pub output: Value,
}

#[derive(Debug, Clone)]
struct EnvEntry {
    value: Value,
    /// Index into the logged-output list identifying the supplying step.
    origin: usize,
}

/// Alias lookup table built from a run's log.
///
/// Construction is pure: it reads the log and the procedure's steps and holds
/// independent copies, so it is safe to build repeatedly and concurrently for
/// different runs.
#[derive(Debug, Clone, Default)]
pub struct OutputEnvironment {
    entries: IndexMap<String, EnvEntry>,
    logged: Vec<LoggedOutput>,
}

impl OutputEnvironment {
    /// Looks up an alias, returning the value and the logged step that
    /// supplied it.
    pub fn lookup(&self, alias: &str) -> Option<(&Value, &LoggedOutput)> {
        let entry = self.entries.get(alias)?;
        Some((&entry.value, &self.logged[entry.origin]))
    }

    /// Logged outputs in completion order.
    pub fn logged(&self) -> &[LoggedOutput] {
        &self.logged
    }

    /// Aliases currently defined, in insertion order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds the alias environment for a run from its log and the owning
/// procedure's steps.
pub fn build_output_environment(logs: &[StepLog], steps: &[Step]) -> OutputEnvironment {
    let mut environment = OutputEnvironment::default();

    for (index, log) in logs.iter().enumerate() {
        let position = index + 1;
        let step = steps
            .get(index)
            .filter(|step| step.id == log.step_id)
            .or_else(|| steps.iter().find(|step| step.id == log.step_id));

        let output = round_trip_copy(&log.output);
        let (alias, title) = match step {
            Some(step) => (step.output_alias(position), step.title.clone()),
            None => (format!("step_{position}"), log.step_id.clone()),
        };

        environment.logged.push(LoggedOutput {
            position,
            step_id: log.step_id.clone(),
            step_title: title,
            output: output.clone(),
        });
        let origin = environment.logged.len() - 1;

        environment.entries.insert(
            alias,
            EnvEntry {
                value: output.clone(),
                origin,
            },
        );
        environment.entries.insert(
            format!("step_{position}_output"),
            EnvEntry {
                value: output.clone(),
                origin,
            },
        );
        environment.entries.insert(
            format!("step_{position}"),
            EnvEntry {
                value: json!({ "output": output }),
                origin,
            },
        );
    }

    environment
}

/// Deep-copies a value through a serialize/deserialize round trip, falling
/// back to a plain clone when the round trip fails.
fn round_trip_copy(value: &Value) -> Value {
    serde_json::to_vec(value)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_else(|| value.clone())
}

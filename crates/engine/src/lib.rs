//! # Runbook Engine
//!
//! The Runbook engine owns the two pieces of this product with real logic:
//! the run-progression state machine and the template-variable resolution
//! engine that turns `{{step_N.output.field}}`-style references embedded in
//! step configuration into literal values at execution time. It also carries
//! the run-staleness computation used by monitoring views.
//!
//! ## Key Features
//!
//! - **Variable Resolution**: `{{ ... }}` references resolved against a run's
//!   logged outputs, with multi-strategy lookup, fallback search, and
//!   provenance tracking
//! - **Run Progression**: atomic advance/flag/resume/reassign operations over
//!   an append-only step log
//! - **Stall Detection**: pure idle-time computation for dashboards
//! - **Reference Diagnostics**: unresolved-reference collection at runtime
//!   and a procedure audit at authoring time
//!
//! ## Architecture
//!
//! - **`environment`**: builds the alias lookup table from a run's log
//! - **`resolve`**: template interpolation and provenance
//! - **`templates`**: placeholder parsing and reference diagnostics
//! - **`run`**: state transitions and the event-streaming driver
//! - **`stall`**: idle-time computation
//! - **`store`**: persistence and identity seams with in-memory impls

use std::{fs, path::Path};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use runbook_types::{ActiveRun, Procedure, Step};
use serde::Deserialize;
use serde_json::Value;

pub mod environment;
pub mod resolve;
pub mod run;
pub mod stall;
pub mod store;
pub mod templates;

// Re-export commonly used types for convenience
pub use environment::{LoggedOutput, OutputEnvironment, build_output_environment};
pub use resolve::{ResolvedConfig, ValueProvenance, resolve_config, resolve_expression_value};
pub use run::{
    DriveStatus, NoopExecutor, RunControl, RunEvent, RunStateError, StepExecutor, advance_run, drive_run, flag_run, reassign_run,
    resume_run,
};
pub use stall::{DEFAULT_STALL_THRESHOLD_HOURS, StallInfo, compute_stall_info, compute_stall_info_with_threshold};
pub use store::{
    IdentityDirectory, InMemoryProcedureStore, InMemoryRunStore, ProcedureStore, RunStore, StaticIdentityDirectory, StoreError,
};
pub use templates::{
    ReferenceWarning, UnresolvedReference, audit_procedure_references, collect_unresolved_references, extract_placeholder_expressions,
    positional_alias_index,
};

/// A collection of named procedures loaded from one document.
#[derive(Debug, Clone, Default)]
pub struct ProcedureBundle {
    /// Procedures keyed by document name, in authoring order.
    pub procedures: IndexMap<String, Procedure>,
}

/// Resolves a step's raw configuration against a run's logged outputs.
///
/// Convenience facade over [`build_output_environment`] and
/// [`resolve_config`]: callers use it before presenting or executing the
/// current step.
pub fn resolve_step_config(raw_config: &Value, run: &ActiveRun, steps: &[Step]) -> ResolvedConfig {
    let environment = build_output_environment(&run.logs, steps);
    resolve::resolve_config(raw_config, &environment)
}

/// Loads a procedure file from the filesystem with automatic format
/// detection.
///
/// The file may be YAML or JSON and may contain either a single procedure or
/// a multi-procedure document keyed under `procedures`. A single procedure
/// without an `id` falls back to `"default"`; procedures in a multi document
/// inherit their key as the id when the field is absent.
///
/// # Errors
///
/// Returns an error when the file cannot be read or its structure matches
/// neither document form.
///
/// # Examples
///
/// ```rust
/// use runbook_engine::parse_procedure_file;
///
/// let temp_dir = tempfile::tempdir()?;
/// let path = temp_dir.path().join("onboarding.yaml");
/// std::fs::write(&path, r#"
/// id: "onboarding"
/// steps:
///   - id: "intake"
///     title: "Collect details"
///     action_type: "intake"
/// "#)?;
///
/// let bundle = parse_procedure_file(&path)?;
/// assert_eq!(bundle.procedures.len(), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn parse_procedure_file(file_path: impl AsRef<Path>) -> Result<ProcedureBundle> {
    let file_path = file_path.as_ref();
    let file_content = fs::read(file_path).with_context(|| format!("Failed to read procedure file: {}", file_path.display()))?;

    let content_string = String::from_utf8_lossy(&file_content);

    // Attempt to parse as a multi-procedure document first to avoid accepting
    // multi documents as single procedures with ignored fields.
    #[derive(Deserialize)]
    struct MultiProcedureDocument {
        procedures: IndexMap<String, Procedure>,
    }

    if let Ok(multi_document) = serde_yaml::from_str::<MultiProcedureDocument>(&content_string) {
        let mut procedures = IndexMap::new();
        for (name, mut procedure) in multi_document.procedures {
            if procedure.id.trim().is_empty() {
                procedure.id = name.clone();
            }
            procedures.insert(name, procedure);
        }
        return Ok(ProcedureBundle { procedures });
    }

    // Attempt to parse as a single procedure
    if let Ok(mut procedure) = serde_yaml::from_str::<Procedure>(&content_string) {
        if procedure.id.trim().is_empty() {
            procedure.id = "default".to_string();
        }
        let mut procedures = IndexMap::new();
        procedures.insert(procedure.id.clone(), procedure);
        return Ok(ProcedureBundle { procedures });
    }

    anyhow::bail!(
        "Unsupported procedure document format. Expected one of:\n\
         - Single procedure with 'id' and 'steps' fields\n\
         - Multi-procedure document with procedures under a 'procedures' key\n\
         "
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use runbook_types::{StepConfig, StepLog, StepOutcome};
    use serde_json::json;

    #[test]
    fn parses_a_single_procedure_document() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("onboarding.yaml");

        let content = r#"
id: "onboarding"
name: "Employee onboarding"
steps:
  - id: "intake"
    title: "Collect details"
    action_type: "intake"
    output_variable_name: "applicant"
  - id: "approve"
    title: "Manager approval"
    action_type: "approval"
    approver: "{{applicant.manager}}"
"#;
        std::fs::write(&path, content).unwrap();

        let bundle = parse_procedure_file(&path).expect("parse single procedure");
        assert_eq!(bundle.procedures.len(), 1);
        let procedure = &bundle.procedures["onboarding"];
        assert_eq!(procedure.steps.len(), 2);
        assert_eq!(procedure.steps[0].config.action_type(), "intake");
    }

    #[test]
    fn parses_a_multi_procedure_document() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bundle.yaml");

        let content = r#"
procedures:
  onboarding:
    steps:
      - id: "intake"
        title: "Collect details"
        action_type: "intake"
  offboarding:
    id: "offboard"
    steps: []
"#;
        std::fs::write(&path, content).unwrap();

        let bundle = parse_procedure_file(&path).expect("parse multi-procedure bundle");
        assert_eq!(bundle.procedures.len(), 2);
        // A missing id inherits the document key.
        assert_eq!(bundle.procedures["onboarding"].id, "onboarding");
        assert_eq!(bundle.procedures["offboarding"].id, "offboard");
    }

    #[test]
    fn parses_a_json_document() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("procedure.json");

        let content = r#"{
  "id": "review",
  "steps": [
    {"id": "screen", "title": "Screen", "action_type": "task"}
  ]
}"#;
        std::fs::write(&path, content).unwrap();

        let bundle = parse_procedure_file(&path).expect("parse json procedure");
        assert_eq!(bundle.procedures["review"].steps.len(), 1);
    }

    #[test]
    fn rejects_documents_with_malformed_steps() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.yaml");

        std::fs::write(&path, "steps:\n  - id: only-an-id\n").unwrap();

        assert!(parse_procedure_file(&path).is_err());
    }

    #[test]
    fn resolve_step_config_reads_the_run_log() {
        let steps = vec![
            Step {
                id: "intake".into(),
                title: "Collect details".into(),
                config: StepConfig::Intake { fields: vec![] },
                output_variable_name: None,
            },
            Step {
                id: "approve".into(),
                title: "Manager approval".into(),
                config: StepConfig::Approval {
                    approver: json!("{{step_1.output.manager}}"),
                    message: json!("Review {{step_1.output.name}}"),
                },
                output_variable_name: None,
            },
        ];
        let mut run = ActiveRun::new("run-1", "onboarding", Utc::now());
        run.logs.push(StepLog {
            step_id: "intake".into(),
            output: json!({"name": "Ana", "manager": "lee@example.com"}),
            timestamp: Utc::now(),
            outcome: StepOutcome::Success,
        });
        run.current_step_index = 1;

        let raw = steps[1].config_value().expect("config value");
        let resolved = resolve_step_config(&raw, &run, &steps);

        assert_eq!(resolved.config["approver"], json!("lee@example.com"));
        assert_eq!(resolved.config["message"], json!("Review Ana"));
        assert_eq!(resolved.provenance.get("approver").expect("provenance").step_id, "intake");
    }
}

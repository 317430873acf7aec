//! Procedure and step definitions.
//!
//! A procedure is an ordered template of steps, authored once and run many
//! times. Step configuration is a tagged union keyed by `action_type` so shape
//! errors surface at deserialization time, while the individual fields that may
//! carry `{{...}}` placeholders are kept as raw [`JsonValue`]s — a resolved
//! reference can legitimately replace a string with an object or a number.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// An ordered template of steps. Sequence order is authoritative; there is no
/// branching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Procedure {
    /// Canonical identifier used for lookups and run association.
    #[serde(default)]
    pub id: String,
    /// Optional human-readable name for menus and dashboards.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional descriptive copy surfaced in detail panes.
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered list of steps executed sequentially.
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Procedure {
    /// Returns the 1-based position of a step within this procedure.
    pub fn step_position(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == step_id).map(|index| index + 1)
    }
}

/// One unit of work within a procedure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Unique identifier for the step within its procedure.
    pub id: String,
    /// Title shown to the assignee working the step.
    pub title: String,
    /// Per-action-type configuration, flattened so documents carry a plain
    /// `action_type` discriminator next to the step metadata.
    #[serde(flatten)]
    pub config: StepConfig,
    /// Author-chosen alias for this step's output. When absent, the positional
    /// alias (`step_N`, 1-based) is used.
    #[serde(default)]
    pub output_variable_name: Option<String>,
}

impl Step {
    /// Returns the alias later steps use to reference this step's output.
    ///
    /// `position` is 1-based, matching the `step_N` authoring convention.
    pub fn output_alias(&self, position: usize) -> String {
        match &self.output_variable_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("step_{position}"),
        }
    }

    /// Serializes the step's configuration into a plain JSON tree for the
    /// resolver to walk.
    pub fn config_value(&self) -> serde_json::Result<JsonValue> {
        serde_json::to_value(&self.config)
    }
}

/// Step configuration, tagged by action type.
///
/// Fields that may carry placeholder references are [`JsonValue`]s rather than
/// `String`s: a full-match placeholder resolves to the referenced value's
/// native type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum StepConfig {
    /// Collects structured data from the assignee.
    Intake {
        /// Form fields presented to the assignee, in authoring order.
        #[serde(default)]
        fields: Vec<FormField>,
    },
    /// Requests a sign-off decision from an approver.
    Approval {
        /// Identity reference (id or email) of the approver.
        approver: JsonValue,
        /// Message displayed alongside the approval request.
        #[serde(default)]
        message: JsonValue,
    },
    /// Sends a message to one or more recipients.
    Notification {
        /// Identity references for the recipients.
        #[serde(default)]
        recipients: Vec<JsonValue>,
        #[serde(default)]
        subject: JsonValue,
        #[serde(default)]
        body: JsonValue,
    },
    /// Free-form work item completed by the assignee.
    Task {
        /// Instructions rendered for the assignee.
        #[serde(default)]
        instructions: JsonValue,
        /// Optional checklist entries, in authoring order.
        #[serde(default)]
        checklist: Vec<JsonValue>,
    },
    /// Calls an external endpoint with a rendered payload.
    Webhook {
        url: JsonValue,
        /// HTTP method; the surrounding application defaults this to POST.
        #[serde(default)]
        method: Option<String>,
        /// Headers sent with the request, in authoring order.
        #[serde(default)]
        headers: IndexMap<String, JsonValue>,
        #[serde(default)]
        payload: JsonValue,
    },
}

impl StepConfig {
    /// Returns the serialized discriminator for this configuration.
    pub fn action_type(&self) -> &'static str {
        match self {
            StepConfig::Intake { .. } => "intake",
            StepConfig::Approval { .. } => "approval",
            StepConfig::Notification { .. } => "notification",
            StepConfig::Task { .. } => "task",
            StepConfig::Webhook { .. } => "webhook",
        }
    }
}

/// One field of an intake form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FormField {
    /// Key under which the captured value lands in the step's output.
    pub name: String,
    /// Label shown next to the field; may reference earlier outputs.
    #[serde(default)]
    pub label: JsonValue,
    /// Declared primitive type (string, number, boolean).
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
    /// When true, the step cannot complete without a value for this field.
    #[serde(default)]
    pub required: bool,
}

//! Shared placeholder parsing and reference diagnostics.
//!
//! The resolver itself never fails on a bad reference; the helpers here are
//! how the rest of the product finds out. [`collect_unresolved_references`]
//! reports, before a step proceeds, every placeholder the current log cannot
//! satisfy, and [`audit_procedure_references`] checks a procedure at authoring
//! time so references that would lean on the cross-step search heuristic get
//! caught while the author is still looking at them.

use once_cell::sync::Lazy;
use regex::Regex;
use runbook_types::Procedure;
use serde_json::Value;

use crate::environment::OutputEnvironment;
use crate::resolve::resolve_expression_value;
use runbook_util::nested_scalar_leaf_candidates;

static POSITIONAL_ALIAS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^step_(\d+)$").expect("valid positional alias pattern"));

/// Returns the 1-based step position named by a positional alias (`step_3`),
/// or `None` for author-chosen aliases.
pub fn positional_alias_index(alias: &str) -> Option<usize> {
    POSITIONAL_ALIAS.captures(alias)?.get(1)?.as_str().parse().ok()
}

/// Extracts placeholder expressions from a string value.
///
/// Returned expressions do not include the `{{` / `}}` delimiters. Text after
/// an unbalanced `{{` is ignored, matching the resolver's treatment of it as
/// literal text.
pub fn extract_placeholder_expressions(value: &str) -> Vec<String> {
    let mut expressions = Vec::new();
    let mut remainder = value;

    while let Some(start) = remainder.find("{{") {
        let after_start = &remainder[start + 2..];
        let Some(end) = after_start.find("}}") else {
            break;
        };
        let expression = after_start[..end].trim();
        if !expression.is_empty() {
            expressions.push(expression.to_string());
        }
        remainder = &after_start[end + 2..];
    }

    expressions
}

/// Structured unresolved reference diagnostic.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnresolvedReference {
    /// Path of the configuration field the reference lives in.
    pub source_path: String,
    /// Raw reference expression without delimiters.
    pub expression: String,
    /// Expressions that would resolve to a field with the same leaf name,
    /// drawn from the outputs actually logged so far.
    pub candidates: Vec<String>,
}

impl UnresolvedReference {
    /// Builds a user-facing message for a missing-data banner.
    pub fn detail_message(&self) -> String {
        if self.candidates.is_empty() {
            return format!("'{{{{{}}}}}' at '{}' does not match any logged output", self.expression, self.source_path);
        }
        format!(
            "'{{{{{}}}}}' at '{}' does not match any logged output; did you mean {}?",
            self.expression,
            self.source_path,
            self.candidates.join(", ")
        )
    }
}

/// Collects every unresolved placeholder in a configuration tree.
///
/// Callers surface the result as a "missing data" condition before the step
/// proceeds; an empty result means the resolver will substitute every
/// reference.
pub fn collect_unresolved_references(value: &Value, source_path: &str, environment: &OutputEnvironment) -> Vec<UnresolvedReference> {
    let mut unresolved = Vec::new();
    collect_from_value(value, source_path, environment, &mut unresolved);
    unresolved
}

fn collect_from_value(value: &Value, source_path: &str, environment: &OutputEnvironment, unresolved: &mut Vec<UnresolvedReference>) {
    match value {
        Value::String(raw_text) => {
            for expression in extract_placeholder_expressions(raw_text) {
                if resolve_expression_value(expression.as_str(), environment).is_none() {
                    unresolved.push(UnresolvedReference {
                        source_path: source_path.to_string(),
                        candidates: leaf_candidates(&expression, environment),
                        expression,
                    });
                }
            }
        }
        Value::Array(values) => {
            for (index, nested_value) in values.iter().enumerate() {
                collect_from_value(nested_value, format!("{source_path}[{index}]").as_str(), environment, unresolved);
            }
        }
        Value::Object(map) => {
            for (key, nested_value) in map {
                let nested_path = if source_path.is_empty() {
                    key.clone()
                } else {
                    format!("{source_path}.{key}")
                };
                collect_from_value(nested_value, &nested_path, environment, unresolved);
            }
        }
        _ => {}
    }
}

/// Looks through the logged outputs for scalar fields whose leaf name matches
/// the expression's final segment and phrases them as reference expressions.
fn leaf_candidates(expression: &str, environment: &OutputEnvironment) -> Vec<String> {
    let leaf = expression.rsplit('.').next().unwrap_or(expression);
    if leaf.is_empty() {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for entry in environment.logged() {
        for path in nested_scalar_leaf_candidates(&entry.output, leaf) {
            candidates.push(format!("step_{}.output.{}", entry.position, path));
        }
    }
    candidates
}

/// Authoring-time warning about a reference that cannot resolve cleanly.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReferenceWarning {
    /// Step whose configuration carries the reference.
    pub step_id: String,
    /// Path of the configuration field the reference lives in.
    pub source_path: String,
    /// Raw reference expression without delimiters.
    pub expression: String,
    pub message: String,
}

/// Checks every placeholder in a procedure against the aliases its earlier
/// steps declare.
///
/// A clean audit means runtime resolution will use the declared aliases
/// directly; warnings mark references that would fail or depend on the
/// cross-step search heuristic.
pub fn audit_procedure_references(procedure: &Procedure) -> Vec<ReferenceWarning> {
    let mut warnings = Vec::new();
    let mut known_aliases: Vec<String> = Vec::new();

    for (index, step) in procedure.steps.iter().enumerate() {
        let position = index + 1;
        if let Ok(config) = step.config_value() {
            audit_value(&config, &step.id, "", position, &known_aliases, &mut warnings);
        }

        known_aliases.push(step.output_alias(position));
        known_aliases.push(format!("step_{position}"));
        known_aliases.push(format!("step_{position}_output"));
    }

    warnings
}

fn audit_value(value: &Value, step_id: &str, source_path: &str, position: usize, known_aliases: &[String], warnings: &mut Vec<ReferenceWarning>) {
    match value {
        Value::String(raw_text) => {
            for expression in extract_placeholder_expressions(raw_text) {
                if let Some(message) = audit_expression(&expression, step_id, position, known_aliases) {
                    warnings.push(ReferenceWarning {
                        step_id: step_id.to_string(),
                        source_path: source_path.to_string(),
                        expression,
                        message,
                    });
                }
            }
        }
        Value::Array(values) => {
            for (index, nested_value) in values.iter().enumerate() {
                audit_value(
                    nested_value,
                    step_id,
                    format!("{source_path}[{index}]").as_str(),
                    position,
                    known_aliases,
                    warnings,
                );
            }
        }
        Value::Object(map) => {
            for (key, nested_value) in map {
                let nested_path = if source_path.is_empty() {
                    key.clone()
                } else {
                    format!("{source_path}.{key}")
                };
                audit_value(nested_value, step_id, &nested_path, position, known_aliases, warnings);
            }
        }
        _ => {}
    }
}

fn audit_expression(expression: &str, step_id: &str, position: usize, known_aliases: &[String]) -> Option<String> {
    let alias = match expression.split_once('.') {
        Some((alias, _)) => alias,
        None => expression,
    };
    if alias.is_empty() || known_aliases.iter().any(|known| known == alias) {
        return None;
    }

    match positional_alias_index(alias) {
        Some(named) if named == position => Some(format!(
            "step '{step_id}' references its own output ('{alias}'), which is not available until the step completes"
        )),
        Some(named) if named > position => Some(format!(
            "step '{step_id}' references '{alias}', which has not completed when this step runs"
        )),
        _ if known_aliases.is_empty() => Some(format!(
            "step '{step_id}' references '{alias}', but no earlier step outputs are available"
        )),
        _ => Some(format!(
            "step '{step_id}' references unknown alias '{alias}' (available: {})",
            known_aliases.join(", ")
        )),
    }
}

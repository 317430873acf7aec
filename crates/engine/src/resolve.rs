//! # Template Resolution
//!
//! This module resolves `{{ ... }}` variable references embedded in step
//! configuration against the output environment of a run. Resolution is
//! deterministic, performs no I/O, and never fails: a reference that cannot be
//! satisfied is preserved verbatim so a single bad reference cannot take down
//! a run.
//!
//! ## Reference Syntax
//!
//! An expression is split on its first `.` into an alias and a field path:
//!
//! - `{{ applicant.name }}` — author-chosen alias, dotted path into the output
//! - `{{ step_2.output.email }}` — positional alias with the nested convention
//! - `{{ step_2_output.email }}` — positional alias with the flattened convention
//!
//! ## Lookup Strategies
//!
//! Resolution tries, in order, stopping at the first success:
//!
//! 1. **Nested lookup** — the alias directly, then the path traversed segment
//!    by segment (numeric segments index arrays).
//! 2. **Flattened fallback** — when the path starts with `output.`, the
//!    `<alias>_output` key with that prefix stripped.
//! 3. **Cross-step search** — for positional `step_N` aliases only, the same
//!    path searched through subsequent steps' logged outputs in increasing
//!    order, then preceding steps' in decreasing order. A best-effort
//!    heuristic for references that name the wrong step index; a warning is
//!    logged whenever it supplies the value.
//!
//! When both the nested and flattened keys exist with differing values, the
//! nested form wins; this precedence is load-bearing for compatibility.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::environment::{LoggedOutput, OutputEnvironment};
use crate::templates::positional_alias_index;

/// Records which logged step supplied a resolved value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueProvenance {
    /// Identifier of the step that actually supplied the value (which may
    /// differ from the step named in the expression when the cross-step
    /// search fired).
    pub step_id: String,
    pub step_title: String,
    /// The reference expression as written, without delimiters.
    pub variable_name: String,
}

/// A configuration tree with placeholders replaced, plus a side-map recording
/// where each substituted value came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub config: Value,
    /// Provenance keyed by destination field path (`approver`,
    /// `recipients[0]`, `fields[1].label`, ...). Fields whose references did
    /// not resolve have no entry.
    pub provenance: IndexMap<String, ValueProvenance>,
}

/// Resolves every placeholder in a configuration tree against the given
/// environment.
///
/// Arrays preserve order and length; non-string leaves are copied unchanged.
/// A string that consists of exactly one placeholder takes the referenced
/// value's native type; placeholders embedded in surrounding text are
/// stringified in place. Unresolved references and unbalanced delimiters are
/// preserved as literal text.
pub fn resolve_config(raw: &Value, environment: &OutputEnvironment) -> ResolvedConfig {
    let mut provenance = IndexMap::new();
    let config = resolve_value(raw, "", environment, &mut provenance);
    ResolvedConfig { config, provenance }
}

fn resolve_value(
    value: &Value,
    source_path: &str,
    environment: &OutputEnvironment,
    provenance: &mut IndexMap<String, ValueProvenance>,
) -> Value {
    match value {
        Value::String(text) => resolve_string(text, source_path, environment, provenance),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| resolve_value(item, format!("{source_path}[{index}]").as_str(), environment, provenance))
                .collect(),
        ),
        Value::Object(map) => {
            let mut resolved_map = serde_json::Map::new();
            for (key, nested) in map {
                let nested_path = if source_path.is_empty() {
                    key.clone()
                } else {
                    format!("{source_path}.{key}")
                };
                resolved_map.insert(key.clone(), resolve_value(nested, &nested_path, environment, provenance));
            }
            Value::Object(resolved_map)
        }
        _ => value.clone(),
    }
}

fn resolve_string(
    text: &str,
    source_path: &str,
    environment: &OutputEnvironment,
    provenance: &mut IndexMap<String, ValueProvenance>,
) -> Value {
    if let Some(expression) = full_match_expression(text) {
        return match resolve_expression(expression, environment) {
            Some((value, origin)) => {
                record_provenance(provenance, source_path, expression, origin);
                value
            }
            None => Value::String(text.to_string()),
        };
    }

    let mut output = String::new();
    let mut remaining = text;

    while let Some(start) = remaining.find("{{") {
        let (before, after) = remaining.split_at(start);
        output.push_str(before);

        let Some(end) = after.find("}}") else {
            // Unbalanced delimiter: the rest is ordinary literal text.
            output.push_str(after);
            return Value::String(output);
        };

        let expression = after[2..end].trim();
        match resolve_expression(expression, environment) {
            Some((value, origin)) => {
                output.push_str(&format_json_value(&value));
                record_provenance(provenance, source_path, expression, origin);
            }
            None => output.push_str(&after[..end + 2]),
        }
        remaining = &after[end + 2..];
    }

    output.push_str(remaining);
    Value::String(output)
}

/// Returns the inner expression when the whole string is exactly one
/// placeholder.
fn full_match_expression(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    let expression = inner.trim();
    (!expression.is_empty()).then_some(expression)
}

fn record_provenance(provenance: &mut IndexMap<String, ValueProvenance>, source_path: &str, expression: &str, origin: &LoggedOutput) {
    provenance.insert(
        source_path.to_string(),
        ValueProvenance {
            step_id: origin.step_id.clone(),
            step_title: origin.step_title.clone(),
            variable_name: expression.to_string(),
        },
    );
}

/// Resolves a reference expression to its value, without provenance.
///
/// Used by the unresolved-reference collector; `None` means no strategy
/// succeeded.
pub fn resolve_expression_value(expression: &str, environment: &OutputEnvironment) -> Option<Value> {
    resolve_expression(expression, environment).map(|(value, _)| value)
}

fn resolve_expression<'e>(expression: &str, environment: &'e OutputEnvironment) -> Option<(Value, &'e LoggedOutput)> {
    let (alias, path) = match expression.split_once('.') {
        Some((alias, path)) => (alias, path),
        None => (expression, ""),
    };
    if alias.is_empty() {
        return None;
    }

    // Strategy 1: nested lookup. Wins over the flattened form when both exist.
    if let Some((root, origin)) = environment.lookup(alias)
        && let Some(found) = select_json_path(root, path)
    {
        return Some((found.clone(), origin));
    }

    // Strategy 2: flattened fallback.
    if let Some(stripped) = path.strip_prefix("output.")
        && let Some((root, origin)) = environment.lookup(format!("{alias}_output").as_str())
        && let Some(found) = select_json_path(root, stripped)
    {
        return Some((found.clone(), origin));
    }

    // Strategy 3: cross-step search for positional references.
    cross_step_search(alias, path, environment)
}

fn cross_step_search<'e>(alias: &str, path: &str, environment: &'e OutputEnvironment) -> Option<(Value, &'e LoggedOutput)> {
    let named_position = positional_alias_index(alias)?;
    let remaining = path.strip_prefix("output.").unwrap_or(path);
    if remaining.is_empty() {
        return None;
    }

    let logged = environment.logged();
    let subsequent = logged.iter().filter(|entry| entry.position > named_position);
    let preceding = logged.iter().rev().filter(|entry| entry.position < named_position);

    for entry in subsequent.chain(preceding) {
        if let Some(found) = select_json_path(&entry.output, remaining) {
            warn!(
                reference = %format!("{alias}.{path}"),
                supplied_by = %entry.step_id,
                "reference resolved through cross-step search"
            );
            return Some((found.clone(), entry));
        }
    }
    None
}

/// Traverses a dotted path into a JSON value; numeric segments index arrays.
/// A missing segment yields `None` rather than an error.
fn select_json_path<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn format_json_value(value: &Value) -> String {
    match value {
        Value::String(string_value) => string_value.clone(),
        Value::Number(number_value) => number_value.to_string(),
        Value::Bool(boolean_value) => boolean_value.to_string(),
        Value::Null => String::new(),
        other_value => other_value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::build_output_environment;
    use chrono::Utc;
    use runbook_types::{Step, StepConfig, StepLog, StepOutcome};
    use serde_json::json;

    fn step(id: &str, alias: Option<&str>) -> Step {
        Step {
            id: id.into(),
            title: format!("Step {id}"),
            config: StepConfig::Task {
                instructions: Value::Null,
                checklist: vec![],
            },
            output_variable_name: alias.map(Into::into),
        }
    }

    fn log(step_id: &str, output: Value) -> StepLog {
        StepLog {
            step_id: step_id.into(),
            output,
            timestamp: Utc::now(),
            outcome: StepOutcome::Success,
        }
    }

    fn two_step_environment() -> OutputEnvironment {
        let steps = vec![step("intake", None), step("screen", None)];
        let logs = vec![
            log("intake", json!({"name": "Ana", "age": 34})),
            log("screen", json!({"email": "a@b.com", "score": {"total": 92}})),
        ];
        build_output_environment(&logs, &steps)
    }

    #[test]
    fn config_without_placeholders_is_copied_unchanged() {
        let environment = two_step_environment();
        let raw = json!({
            "title": "Plain",
            "count": 3,
            "nested": {"flag": true, "items": [1, "two", null]}
        });

        let resolved = resolve_config(&raw, &environment);

        assert_eq!(resolved.config, raw);
        assert!(resolved.provenance.is_empty());
    }

    #[test]
    fn full_match_takes_the_native_type() {
        let environment = two_step_environment();

        let resolved = resolve_config(&json!({"who": "{{step_1.output.name}}"}), &environment);
        assert_eq!(resolved.config["who"], json!("Ana"));

        let resolved = resolve_config(&json!({"age": "{{step_1.output.age}}"}), &environment);
        assert_eq!(resolved.config["age"], json!(34));

        let resolved = resolve_config(&json!({"score": "{{step_2.output.score}}"}), &environment);
        assert_eq!(resolved.config["score"], json!({"total": 92}));
    }

    #[test]
    fn full_match_records_provenance() {
        let environment = two_step_environment();

        let resolved = resolve_config(&json!({"who": "{{ step_1.output.name }}"}), &environment);

        let entry = resolved.provenance.get("who").expect("provenance for 'who'");
        assert_eq!(entry.step_id, "intake");
        assert_eq!(entry.step_title, "Step intake");
        assert_eq!(entry.variable_name, "step_1.output.name");
    }

    #[test]
    fn embedded_placeholder_is_stringified_in_place() {
        let environment = two_step_environment();

        let resolved = resolve_config(&json!({"greeting": "Hello {{step_1.output.name}}!"}), &environment);

        assert_eq!(resolved.config["greeting"], json!("Hello Ana!"));
        assert_eq!(resolved.provenance.get("greeting").expect("provenance").step_id, "intake");
    }

    #[test]
    fn multiple_embedded_placeholders_resolve_left_to_right() {
        let environment = two_step_environment();

        let resolved = resolve_config(
            &json!({"line": "{{step_1.output.name}} <{{step_2.output.email}}> scored {{step_2.output.score.total}}"}),
            &environment,
        );

        assert_eq!(resolved.config["line"], json!("Ana <a@b.com> scored 92"));
    }

    #[test]
    fn embedded_object_uses_canonical_json_text() {
        let environment = two_step_environment();

        let resolved = resolve_config(&json!({"text": "score: {{step_2.output.score}}"}), &environment);

        assert_eq!(resolved.config["text"], json!(r#"score: {"total":92}"#));
    }

    #[test]
    fn cross_step_search_finds_a_field_logged_by_an_adjacent_step() {
        let environment = two_step_environment();

        // step_1's output has no `email`; step_2's does.
        let resolved = resolve_config(&json!({"contact": "{{step_1.output.email}}"}), &environment);

        assert_eq!(resolved.config["contact"], json!("a@b.com"));
        let entry = resolved.provenance.get("contact").expect("provenance");
        assert_eq!(entry.step_id, "screen");
        assert_eq!(entry.variable_name, "step_1.output.email");
    }

    #[test]
    fn cross_step_search_prefers_subsequent_steps() {
        let steps = vec![step("a", None), step("b", None), step("c", None)];
        let logs = vec![
            log("a", json!({"token": "from-a"})),
            log("b", json!({})),
            log("c", json!({"token": "from-c"})),
        ];
        let environment = build_output_environment(&logs, &steps);

        let resolved = resolve_config(&json!({"t": "{{step_2.output.token}}"}), &environment);

        assert_eq!(resolved.config["t"], json!("from-c"));
        assert_eq!(resolved.provenance.get("t").expect("provenance").step_id, "c");
    }

    #[test]
    fn cross_step_search_falls_back_to_preceding_steps() {
        let steps = vec![step("a", None), step("b", None)];
        let logs = vec![log("a", json!({"token": "from-a"})), log("b", json!({}))];
        let environment = build_output_environment(&logs, &steps);

        let resolved = resolve_config(&json!({"t": "{{step_2.output.token}}"}), &environment);

        assert_eq!(resolved.config["t"], json!("from-a"));
        assert_eq!(resolved.provenance.get("t").expect("provenance").step_id, "a");
    }

    #[test]
    fn unresolved_reference_is_preserved_verbatim() {
        let environment = two_step_environment();
        let raw = json!({"x": "{{step_9.output.x}}", "y": "before {{missing.thing}} after"});

        let resolved = resolve_config(&raw, &environment);

        assert_eq!(resolved.config["x"], json!("{{step_9.output.x}}"));
        assert_eq!(resolved.config["y"], json!("before {{missing.thing}} after"));
        assert!(resolved.provenance.is_empty());
    }

    #[test]
    fn unbalanced_delimiters_are_ordinary_text() {
        let environment = two_step_environment();
        let raw = json!({"x": "value: {{step_1.output.name", "y": "tail}} only"});

        let resolved = resolve_config(&raw, &environment);

        assert_eq!(resolved.config, raw);
        assert!(resolved.provenance.is_empty());
    }

    #[test]
    fn resolution_is_idempotent() {
        let environment = two_step_environment();
        let raw = json!({
            "who": "{{step_1.output.name}}",
            "missing": "{{step_9.output.x}}",
            "items": ["{{step_2.output.email}}", 1, true]
        });

        let first = resolve_config(&raw, &environment);
        let second = resolve_config(&first.config, &environment);

        assert_eq!(second.config, first.config);
    }

    #[test]
    fn arrays_preserve_order_and_length() {
        let environment = two_step_environment();
        let raw = json!({"items": ["{{step_1.output.name}}", "literal", "{{step_2.output.email}}"]});

        let resolved = resolve_config(&raw, &environment);

        assert_eq!(resolved.config["items"], json!(["Ana", "literal", "a@b.com"]));
        assert!(resolved.provenance.contains_key("items[0]"));
        assert!(resolved.provenance.contains_key("items[2]"));
        assert!(!resolved.provenance.contains_key("items[1]"));
    }

    #[test]
    fn nested_form_wins_over_flattened_when_both_exist() {
        // The second step hijacks the `step_1` alias, so `step_1` and
        // `step_1_output` name different outputs.
        let steps = vec![step("first", None), step("second", Some("step_1"))];
        let logs = vec![
            log("first", json!({"name": "from-first"})),
            log("second", json!({"output": {"name": "from-second"}})),
        ];
        let environment = build_output_environment(&logs, &steps);

        let resolved = resolve_config(&json!({"who": "{{step_1.output.name}}"}), &environment);

        assert_eq!(resolved.config["who"], json!("from-second"));
        assert_eq!(resolved.provenance.get("who").expect("provenance").step_id, "second");
    }

    #[test]
    fn flattened_fallback_reaches_the_raw_output() {
        let steps = vec![step("first", None), step("second", Some("step_1"))];
        let logs = vec![
            log("first", json!({"name": "from-first"})),
            log("second", json!({"other": true})),
        ];
        let environment = build_output_environment(&logs, &steps);

        // `step_1` now maps to the second step's raw output, which lacks the
        // nested path; the flattened `step_1_output` key still carries the
        // first step's output.
        let resolved = resolve_config(&json!({"who": "{{step_1.output.name}}"}), &environment);

        assert_eq!(resolved.config["who"], json!("from-first"));
        assert_eq!(resolved.provenance.get("who").expect("provenance").step_id, "first");
    }

    #[test]
    fn custom_alias_resolves_without_output_segment() {
        let steps = vec![step("intake", Some("applicant"))];
        let logs = vec![log("intake", json!({"name": "Ana"}))];
        let environment = build_output_environment(&logs, &steps);

        let resolved = resolve_config(&json!({"who": "{{applicant.name}}", "all": "{{applicant}}"}), &environment);

        assert_eq!(resolved.config["who"], json!("Ana"));
        assert_eq!(resolved.config["all"], json!({"name": "Ana"}));
    }

    #[test]
    fn null_stringifies_to_empty_in_embedded_position() {
        let steps = vec![step("intake", None)];
        let logs = vec![log("intake", json!({"middle_name": null}))];
        let environment = build_output_environment(&logs, &steps);

        let resolved = resolve_config(&json!({"text": "[{{step_1.output.middle_name}}]"}), &environment);

        assert_eq!(resolved.config["text"], json!("[]"));
    }

    #[test]
    fn numeric_segments_index_into_arrays() {
        let steps = vec![step("intake", None)];
        let logs = vec![log("intake", json!({"contacts": [{"email": "first@x"}, {"email": "second@x"}]}))];
        let environment = build_output_environment(&logs, &steps);

        let resolved = resolve_config(&json!({"to": "{{step_1.output.contacts.1.email}}"}), &environment);

        assert_eq!(resolved.config["to"], json!("second@x"));
    }

    #[test]
    fn provenance_paths_address_nested_destinations() {
        let environment = two_step_environment();
        let raw = json!({"notify": {"recipients": ["{{step_2.output.email}}"]}});

        let resolved = resolve_config(&raw, &environment);

        assert!(resolved.provenance.contains_key("notify.recipients[0]"));
    }
}

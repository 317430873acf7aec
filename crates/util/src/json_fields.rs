//! JSON inspection helpers used for reference diagnostics.
//!
//! The reference audit suggests alternatives when a variable reference cannot
//! be satisfied; these helpers enumerate where a field actually lives inside a
//! logged output so the diagnostic can name candidates.

use serde_json::Value;

/// Returns sorted top-level object field names from a JSON value.
pub fn json_top_level_fields(value: &Value) -> Vec<String> {
    let Value::Object(map) = value else {
        return Vec::new();
    };
    let mut fields = map.keys().cloned().collect::<Vec<_>>();
    fields.sort();
    fields
}

/// Returns true when the JSON value is scalar (string/number/bool/null).
pub fn is_scalar_json_value(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null)
}

/// Collect scalar leaf candidates from a JSON payload by leaf key name.
///
/// Returns the dotted path of every scalar value whose final segment matches
/// `leaf`, in document order.
pub fn nested_scalar_leaf_candidates(value: &Value, leaf: &str) -> Vec<String> {
    let mut matches = Vec::new();
    collect_candidates(value, "", leaf, &mut matches);
    matches
}

fn collect_candidates(value: &Value, current_path: &str, leaf: &str, matches: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, nested_value) in map {
                let next_path = if current_path.is_empty() {
                    key.to_string()
                } else {
                    format!("{current_path}.{key}")
                };
                if key == leaf && is_scalar_json_value(nested_value) {
                    matches.push(next_path.clone());
                }
                collect_candidates(nested_value, &next_path, leaf, matches);
            }
        }
        Value::Array(items) => {
            for (index, nested_value) in items.iter().enumerate() {
                let next_path = if current_path.is_empty() {
                    index.to_string()
                } else {
                    format!("{current_path}.{index}")
                };
                collect_candidates(nested_value, &next_path, leaf, matches);
            }
        }
        _ => {}
    }
}

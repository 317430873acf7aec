//! Leaf helpers shared across the Runbook workspace.

pub mod elapsed;
pub mod json_fields;

pub use elapsed::format_elapsed;
pub use json_fields::{is_scalar_json_value, json_top_level_fields, nested_scalar_leaf_candidates};

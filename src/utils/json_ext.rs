//! JSON merge utilities for document metadata.
//!
//! Document metadata is a JSON object that several writers touch: the
//! caller at ingestion, and each processor under its own slice key. Stores
//! apply metadata patches with [`deep_merge`] so a writer can update its
//! slice without clobbering the rest of the object.

use miette::Diagnostic;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while merging JSON values.
#[derive(Debug, Error, Diagnostic)]
pub enum JsonError {
    /// Two values at the same path cannot be reconciled under the chosen
    /// strategy.
    #[error("merge conflict at path '{path}': cannot merge {left_type} with {right_type}")]
    #[diagnostic(code(gleanforge::json::merge_conflict))]
    MergeConflict {
        path: String,
        left_type: String,
        right_type: String,
    },
}

/// Conflict handling for [`deep_merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Keep the left value wherever both sides define one.
    PreferLeft,
    /// Keep the right value wherever both sides define one.
    PreferRight,
    /// Error on any conflicting leaf.
    FailOnConflict,
    /// Merge objects recursively; arrays and scalars take the right value.
    /// This is what metadata patches use: a processor rewriting its slice
    /// replaces its own arrays instead of growing them across runs.
    DeepMerge,
}

/// Deep merge of two JSON values under `strategy`.
///
/// Objects are merged key by key for every strategy; the strategy decides
/// what happens when both sides hold a non-object at the same path.
pub fn deep_merge(left: &Value, right: &Value, strategy: MergeStrategy) -> Result<Value, JsonError> {
    merge_at_path(left, right, strategy, "")
}

fn merge_at_path(
    left: &Value,
    right: &Value,
    strategy: MergeStrategy,
    path: &str,
) -> Result<Value, JsonError> {
    match (left, right) {
        (Value::Object(left_obj), Value::Object(right_obj)) => {
            let mut result = Map::new();
            for (key, value) in left_obj {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                match right_obj.get(key) {
                    Some(right_value) => {
                        result.insert(
                            key.clone(),
                            merge_at_path(value, right_value, strategy, &child_path)?,
                        );
                    }
                    None => {
                        result.insert(key.clone(), value.clone());
                    }
                }
            }
            for (key, value) in right_obj {
                if !left_obj.contains_key(key) {
                    result.insert(key.clone(), value.clone());
                }
            }
            Ok(Value::Object(result))
        }

        (left_val, right_val) if left_val == right_val => Ok(left_val.clone()),

        (left_val, right_val) => match strategy {
            MergeStrategy::PreferLeft => Ok(left_val.clone()),
            MergeStrategy::PreferRight | MergeStrategy::DeepMerge => Ok(right_val.clone()),
            MergeStrategy::FailOnConflict => Err(JsonError::MergeConflict {
                path: path.to_string(),
                left_type: value_type(left_val).to_string(),
                right_type: value_type(right_val).to_string(),
            }),
        },
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Looks up a value by dot-separated path, descending through objects and
/// array indexes.
#[must_use]
pub fn get_by_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            Value::Array(arr) => current = arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        }
    }
    Some(current)
}

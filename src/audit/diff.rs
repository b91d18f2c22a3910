//! Payload construction for history records
//!
//! Builds either a full snapshot or a minimal change-set between two
//! document states, and renders human-readable change summaries for logs.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::{HistoryError, HistoryResult};
use crate::models::{is_reserved, Document, ID_FIELD};

use super::entry::Operation;

/// How update payloads are recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffMode {
    /// Store the whole new document
    #[default]
    Full,
    /// Store the identifier plus the fields that changed
    ChangesOnly,
}

/// Field-level comparison used in change-set mode
///
/// `new` or `old` is `None` when the field is absent on that side.
/// Return `Ok(None)` when the field is unchanged, or `Ok(Some(value))` with
/// the value to store. The stored value need not equal `new`.
pub trait DiffComparator: Send + Sync {
    fn compare(
        &self,
        field: &str,
        new: Option<&Value>,
        old: Option<&Value>,
    ) -> HistoryResult<Option<Value>>;
}

/// Deep structural equality; absent and `null` are treated alike
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralComparator;

impl DiffComparator for StructuralComparator {
    fn compare(
        &self,
        _field: &str,
        new: Option<&Value>,
        old: Option<&Value>,
    ) -> HistoryResult<Option<Value>> {
        let new = new.filter(|v| !v.is_null());
        let old = old.filter(|v| !v.is_null());
        Ok(match (new, old) {
            (None, None) => None,
            (Some(n), Some(o)) if n == o => None,
            (Some(n), _) => Some(n.clone()),
            (None, Some(_)) => Some(Value::Null),
        })
    }
}

/// Order-independent equality for the named array fields
///
/// Reordering the elements of a listed field is not a change; any change in
/// membership stores the full new array. Other fields fall back to
/// [`StructuralComparator`].
#[derive(Debug, Clone, Default)]
pub struct UnorderedSetComparator {
    fields: HashSet<String>,
}

impl UnorderedSetComparator {
    /// Treat the given fields as unordered sets
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl DiffComparator for UnorderedSetComparator {
    fn compare(
        &self,
        field: &str,
        new: Option<&Value>,
        old: Option<&Value>,
    ) -> HistoryResult<Option<Value>> {
        if !self.fields.contains(field) {
            return StructuralComparator.compare(field, new, old);
        }

        match (new, old) {
            (Some(Value::Array(n)), Some(Value::Array(o))) => {
                if same_members(n, o) {
                    Ok(None)
                } else {
                    Ok(Some(Value::Array(n.clone())))
                }
            }
            (Some(Value::Array(n)), None | Some(Value::Null)) => Ok(Some(Value::Array(n.clone()))),
            (None | Some(Value::Null), Some(Value::Array(_))) => Ok(Some(Value::Null)),
            (None | Some(Value::Null), None | Some(Value::Null)) => Ok(None),
            (Some(other), _) | (None, Some(other)) => Err(HistoryError::Diff {
                field: field.to_string(),
                message: format!("expected an array, got {}", format_value(other)),
            }),
        }
    }
}

fn same_members(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut left: Vec<String> = a.iter().map(Value::to_string).collect();
    let mut right: Vec<String> = b.iter().map(Value::to_string).collect();
    left.sort();
    right.sort();
    left == right
}

/// Build the `d` payload of a history record
///
/// Inserts and deletes always store the full document. Updates store the
/// full new document in [`DiffMode::Full`], or in
/// [`DiffMode::ChangesOnly`] the identifier plus every field the comparator
/// reports as changed. Version counters are never part of a change-set.
/// Without an old state an update falls back to the full new document.
pub fn build_payload(
    old: Option<&Document>,
    new: &Document,
    operation: Operation,
    mode: DiffMode,
    comparator: &dyn DiffComparator,
) -> HistoryResult<Value> {
    let old = match (operation, mode, old) {
        (Operation::Update, DiffMode::ChangesOnly, Some(old)) => old,
        _ => return Ok(Value::Object(new.clone())),
    };

    let mut changes = Map::new();
    if let Some(id) = new.get(ID_FIELD).or_else(|| old.get(ID_FIELD)) {
        changes.insert(ID_FIELD.to_string(), id.clone());
    }

    let removed = old.keys().filter(|key| !new.contains_key(*key));
    for field in new.keys().chain(removed) {
        if field == ID_FIELD || is_reserved(field) {
            continue;
        }
        if let Some(stored) = comparator.compare(field, new.get(field), old.get(field))? {
            changes.insert(field.clone(), stored);
        }
    }

    Ok(Value::Object(changes))
}

/// Generate a human-readable summary of the changes between two values
///
/// Returns `None` when nothing changed. Only top-level fields are listed.
pub fn summarize_changes(before: &Value, after: &Value) -> Option<String> {
    match (before, after) {
        (Value::Object(before_obj), Value::Object(after_obj)) => {
            let mut changes = Vec::new();

            for (key, before_val) in before_obj {
                if is_reserved(key) {
                    continue;
                }
                if let Some(after_val) = after_obj.get(key) {
                    if before_val != after_val {
                        changes.push(format!(
                            "{}: {} -> {}",
                            key,
                            format_value(before_val),
                            format_value(after_val)
                        ));
                    }
                } else {
                    changes.push(format!(
                        "{}: {} -> (removed)",
                        key,
                        format_value(before_val)
                    ));
                }
            }

            for (key, after_val) in after_obj {
                if !before_obj.contains_key(key) && !is_reserved(key) {
                    changes.push(format!("{}: (added) -> {}", key, format_value(after_val)));
                }
            }

            if changes.is_empty() {
                None
            } else {
                Some(changes.join(", "))
            }
        }
        _ => {
            if before != after {
                Some(format!(
                    "{} -> {}",
                    format_value(before),
                    format_value(after)
                ))
            } else {
                None
            }
        }
    }
}

/// Format a JSON value for human-readable display
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            // Truncate long strings
            if s.chars().count() > 50 {
                let head: String = s.chars().take(47).collect();
                format!("\"{}...\"", head)
            } else {
                format!("\"{}\"", s)
            }
        }
        Value::Array(arr) => format!("[{} items]", arr.len()),
        Value::Object(obj) => format!("{{{} fields}}", obj.len()),
    }
}

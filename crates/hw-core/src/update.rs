//! Atomic field mutations applied to hit documents.
//!
//! An [`UpdateOperation`] describes one change to one dotted field path. The
//! workflow and operations produce them; the store applies them, either to a
//! single versioned document or to every document matching a query.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

use crate::error::InvalidDataError;
use crate::models::{Hit, LogEntry, User};

/// Kind of field mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Set,
    Increment,
    Decrement,
    Max,
    Min,
    Append,
    AppendIfMissing,
    Remove,
    Delete,
}

impl OperationKind {
    /// Returns the kind name as recorded in hit logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Set => "set",
            OperationKind::Increment => "increment",
            OperationKind::Decrement => "decrement",
            OperationKind::Max => "max",
            OperationKind::Min => "min",
            OperationKind::Append => "append",
            OperationKind::AppendIfMissing => "append_if_missing",
            OperationKind::Remove => "remove",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One atomic field mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOperation {
    pub kind: OperationKind,
    /// Dotted field path, e.g. `labels.threat`.
    pub field: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Silent operations leave no log entry.
    #[serde(default)]
    pub silent: bool,
}

impl UpdateOperation {
    /// Creates an operation.
    pub fn new(kind: OperationKind, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            kind,
            field: field.into(),
            value: value.into(),
            explanation: None,
            silent: false,
        }
    }

    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(OperationKind::Set, field, value)
    }

    pub fn increment(field: impl Into<String>, by: impl Into<Value>) -> Self {
        Self::new(OperationKind::Increment, field, by)
    }

    pub fn decrement(field: impl Into<String>, by: impl Into<Value>) -> Self {
        Self::new(OperationKind::Decrement, field, by)
    }

    pub fn max(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(OperationKind::Max, field, value)
    }

    pub fn min(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(OperationKind::Min, field, value)
    }

    pub fn append(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(OperationKind::Append, field, value)
    }

    pub fn append_if_missing(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(OperationKind::AppendIfMissing, field, value)
    }

    pub fn remove(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(OperationKind::Remove, field, value)
    }

    pub fn delete(field: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, field, Value::Null)
    }

    /// Attaches an explanation recorded in the hit log.
    pub fn explained(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// Marks the operation as silent.
    pub fn silently(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Whether two operations write the same effect. Explanations don't count.
    pub fn same_effect(&self, other: &UpdateOperation) -> bool {
        self.kind == other.kind && self.field == other.field && self.value == other.value
    }

    /// Applies the operation to a JSON document, returning the previous value
    /// of the field (`Null` when absent).
    pub fn apply(&self, document: &mut Value) -> Result<Value, InvalidDataError> {
        let (parents, leaf) = split_path(&self.field)?;

        if self.kind == OperationKind::Delete || self.kind == OperationKind::Remove {
            let Some(parent) = find_parent_mut(document, &parents) else {
                return Ok(Value::Null);
            };
            let previous = parent.get(leaf).cloned().unwrap_or(Value::Null);
            if self.kind == OperationKind::Delete {
                parent.remove(leaf);
            } else if let Some(Value::Array(items)) = parent.get_mut(leaf) {
                items.retain(|item| item != &self.value);
            }
            return Ok(previous);
        }

        let parent = create_parent_mut(document, &parents, &self.field)?;
        let previous = parent.get(leaf).cloned().unwrap_or(Value::Null);

        let next = match self.kind {
            OperationKind::Set => self.value.clone(),
            OperationKind::Increment => self.arithmetic(&previous, 1.0)?,
            OperationKind::Decrement => self.arithmetic(&previous, -1.0)?,
            OperationKind::Max | OperationKind::Min => {
                let wanted = if self.kind == OperationKind::Max {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
                match compare_values(&self.value, &previous) {
                    _ if previous.is_null() => self.value.clone(),
                    Some(ordering) if ordering == wanted => self.value.clone(),
                    Some(_) => previous.clone(),
                    None => {
                        return Err(InvalidDataError::new(format!(
                            "Cannot compare {} with the current value of '{}'",
                            self.value, self.field
                        )))
                    }
                }
            }
            OperationKind::Append | OperationKind::AppendIfMissing => {
                let mut items = match &previous {
                    Value::Null => Vec::new(),
                    Value::Array(items) => items.clone(),
                    _ => {
                        return Err(InvalidDataError::new(format!(
                            "Cannot append to non-list field '{}'",
                            self.field
                        )))
                    }
                };
                if self.kind == OperationKind::Append || !items.contains(&self.value) {
                    items.push(self.value.clone());
                }
                Value::Array(items)
            }
            OperationKind::Remove | OperationKind::Delete => previous.clone(),
        };

        parent.insert(leaf.to_string(), next);
        Ok(previous)
    }

    fn arithmetic(&self, previous: &Value, sign: f64) -> Result<Value, InvalidDataError> {
        let not_numeric = || {
            InvalidDataError::new(format!(
                "Cannot {} field '{}' by {}",
                self.kind, self.field, self.value
            ))
        };
        let current = match previous {
            Value::Null => Value::from(0),
            Value::Number(_) => previous.clone(),
            _ => return Err(not_numeric()),
        };
        if let (Some(a), Some(b)) = (current.as_i64(), self.value.as_i64()) {
            let delta = if sign < 0.0 { -b } else { b };
            return Ok(Value::from(a + delta));
        }
        match (current.as_f64(), self.value.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::from(a + sign * b)),
            _ => Err(not_numeric()),
        }
    }

    /// Builds the log entry recording this operation.
    pub fn log_entry(&self, previous: Value, user: &User) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            key: self.field.clone(),
            previous_value: previous,
            new_value: self.value.clone(),
            kind: self.kind.to_string(),
            user: user.username.clone(),
            explanation: self.explanation.clone(),
        }
    }
}

impl fmt::Display for UpdateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind, self.field, self.value)
    }
}

/// Applies operations to a hit in order, appending a log entry for every
/// non-silent operation.
pub fn apply_to_hit(
    hit: &Hit,
    operations: &[UpdateOperation],
    user: &User,
) -> Result<Hit, InvalidDataError> {
    let mut document = hit.to_document()?;
    for operation in operations {
        let previous = operation.apply(&mut document)?;
        if !operation.silent {
            let entry = operation.log_entry(previous, user);
            let entry = serde_json::to_value(entry)
                .map_err(|e| InvalidDataError::with_cause("Failed to serialize log entry", e))?;
            UpdateOperation::append("log", entry).apply(&mut document)?;
        }
    }
    Hit::from_document(document)
}

/// Extends operations destined for a query-wide update with silent `log`
/// appends. The previous value is not known store-side and is left null.
pub fn with_log_entries(operations: &[UpdateOperation], user: &User) -> Vec<UpdateOperation> {
    let mut all = operations.to_vec();
    for operation in operations.iter().filter(|op| !op.silent) {
        let entry = operation.log_entry(Value::Null, user);
        if let Ok(entry) = serde_json::to_value(entry) {
            all.push(UpdateOperation::append("log", entry).silently());
        }
    }
    all
}

fn split_path(field: &str) -> Result<(Vec<&str>, &str), InvalidDataError> {
    let segments: Vec<&str> = field.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(InvalidDataError::new(format!(
            "Invalid field path: '{}'",
            field
        )));
    }
    let (leaf, parents) = segments
        .split_last()
        .ok_or_else(|| InvalidDataError::new("Field path cannot be empty"))?;
    Ok((parents.to_vec(), leaf))
}

fn find_parent_mut<'a>(document: &'a mut Value, parents: &[&str]) -> Option<&'a mut Map<String, Value>> {
    let mut current = document;
    for segment in parents {
        current = current.as_object_mut()?.get_mut(*segment)?;
    }
    current.as_object_mut()
}

fn create_parent_mut<'a>(
    document: &'a mut Value,
    parents: &[&str],
    field: &str,
) -> Result<&'a mut Map<String, Value>, InvalidDataError> {
    let mut current = document;
    for segment in parents {
        let object = current.as_object_mut().ok_or_else(|| {
            InvalidDataError::new(format!("Field path '{}' crosses a non-object value", field))
        })?;
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    current.as_object_mut().ok_or_else(|| {
        InvalidDataError::new(format!("Field path '{}' crosses a non-object value", field))
    })
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

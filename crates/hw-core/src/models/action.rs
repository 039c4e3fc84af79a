//! Stored automation rules.
//!
//! An action binds one or more registered operations to one or more
//! lifecycle triggers, scoped by a stored query.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::InvalidDataError;

/// A named lifecycle event that can fire automations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Hits were ingested or created by correlation.
    Create,
    AssignToMe,
    AssignToOther,
    Release,
    Start,
    Pause,
    Resume,
    Assess,
    ReEvaluate,
    Promote,
    Demote,
    Vote,
    /// Explicit invocation by an analyst.
    Manual,
}

impl Trigger {
    /// The closed trigger vocabulary.
    pub const ALL: [Trigger; 13] = [
        Trigger::Create,
        Trigger::AssignToMe,
        Trigger::AssignToOther,
        Trigger::Release,
        Trigger::Start,
        Trigger::Pause,
        Trigger::Resume,
        Trigger::Assess,
        Trigger::ReEvaluate,
        Trigger::Promote,
        Trigger::Demote,
        Trigger::Vote,
        Trigger::Manual,
    ];

    /// Returns the trigger name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Create => "create",
            Trigger::AssignToMe => "assign_to_me",
            Trigger::AssignToOther => "assign_to_other",
            Trigger::Release => "release",
            Trigger::Start => "start",
            Trigger::Pause => "pause",
            Trigger::Resume => "resume",
            Trigger::Assess => "assess",
            Trigger::ReEvaluate => "re_evaluate",
            Trigger::Promote => "promote",
            Trigger::Demote => "demote",
            Trigger::Vote => "vote",
            Trigger::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = InvalidDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Trigger::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| InvalidDataError::new(format!("Invalid trigger: {}", s)))
    }
}

/// One operation invocation declared on an action.
///
/// Parameter values are stored either as a raw map or as a JSON-encoded map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEntry {
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_json: Option<String>,
}

impl OperationEntry {
    /// Creates an entry with a raw parameter map.
    pub fn new(
        operation_id: impl Into<String>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            data: Some(data),
            data_json: None,
        }
    }

    /// Creates an entry with a JSON-encoded parameter map.
    pub fn with_json(operation_id: impl Into<String>, data_json: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            data: None,
            data_json: Some(data_json.into()),
        }
    }

    /// Resolves the parameter values. The raw map wins when both are present.
    pub fn parameters(&self) -> Result<serde_json::Map<String, serde_json::Value>, InvalidDataError> {
        if let Some(data) = &self.data {
            return Ok(data.clone());
        }
        match &self.data_json {
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                InvalidDataError::with_cause(
                    format!(
                        "Parameters for operation '{}' are not a JSON object",
                        self.operation_id
                    ),
                    e,
                )
            }),
            None => Ok(serde_json::Map::new()),
        }
    }
}

/// A stored, query-scoped automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub name: String,
    pub owner: String,
    /// Scope predicate in the store's query language.
    pub query: String,
    pub operations: Vec<OperationEntry>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

impl ActionRecord {
    /// Whether the action fires on the given trigger.
    pub fn fires_on(&self, trigger: Trigger) -> bool {
        self.triggers.contains(&trigger)
    }

    /// Checks that the action declares at most one entry per operation id.
    pub fn validate(&self) -> Result<(), InvalidDataError> {
        if self.name.trim().is_empty() {
            return Err(InvalidDataError::new("Action name cannot be empty"));
        }
        if self.query.trim().is_empty() {
            return Err(InvalidDataError::new(format!(
                "Action '{}' has an empty query",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for entry in &self.operations {
            if !seen.insert(entry.operation_id.as_str()) {
                return Err(InvalidDataError::new(format!(
                    "Action '{}' declares operation '{}' more than once",
                    self.name, entry.operation_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(operations: Vec<OperationEntry>) -> ActionRecord {
        ActionRecord {
            id: "a1".into(),
            name: "Label beacons".into(),
            owner: "admin".into(),
            query: "analytic:Beaconing".into(),
            operations,
            triggers: vec![Trigger::Create],
        }
    }

    #[test]
    fn test_trigger_vocabulary() {
        assert_eq!("re_evaluate".parse::<Trigger>().unwrap(), Trigger::ReEvaluate);
        assert_eq!(Trigger::AssignToOther.to_string(), "assign_to_other");
        assert!("explode".parse::<Trigger>().is_err());
    }

    #[test]
    fn test_parameters_from_raw_and_json() {
        let raw = OperationEntry::new(
            "add_label",
            json!({"category": "generic", "label": "x"})
                .as_object()
                .unwrap()
                .clone(),
        );
        assert_eq!(raw.parameters().unwrap()["label"], json!("x"));

        let encoded = OperationEntry::with_json("add_label", r#"{"label": "y"}"#);
        assert_eq!(encoded.parameters().unwrap()["label"], json!("y"));

        let broken = OperationEntry::with_json("add_label", "[1, 2]");
        assert!(broken.parameters().is_err());
    }

    #[test]
    fn test_duplicate_operation_rejected() {
        let entry = OperationEntry::with_json("add_label", "{}");
        assert!(record(vec![entry.clone()]).validate().is_ok());
        assert!(record(vec![entry.clone(), entry]).validate().is_err());
    }
}

//! Operation specification model.
//!
//! A specification is what callers see of an operation before running it:
//! who may run it, which arguments each step collects and which triggers it
//! may be bound to.

use hw_core::{Role, Trigger};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Short and long descriptions of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub short: String,
    pub long: String,
}

/// One step of argument collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Argument name to the arguments whose values it depends on.
    #[serde(default)]
    pub args: BTreeMap<String, Vec<String>>,
    /// Allowed values per argument. Arguments without options are free-form.
    #[serde(default)]
    pub options: BTreeMap<String, Vec<String>>,
    /// Severity (`warn` or `error`) to a query template selecting hits the
    /// step will not affect. `$name` placeholders refer to arguments.
    #[serde(default)]
    pub validation: BTreeMap<String, String>,
}

impl Step {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an argument with no dependencies.
    pub fn arg(self, name: impl Into<String>) -> Self {
        self.arg_depending_on(name, Vec::<String>::new())
    }

    /// Adds an argument whose options depend on other arguments.
    pub fn arg_depending_on<I, S>(mut self, name: impl Into<String>, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args
            .insert(name.into(), depends_on.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts an argument to a fixed set of values.
    pub fn options<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn validation(mut self, severity: impl Into<String>, query: impl Into<String>) -> Self {
        self.validation.insert(severity.into(), query.into());
        self
    }
}

/// Public description of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSpecification {
    pub id: String,
    pub title: String,
    /// Display ordering; lower sorts first.
    pub priority: u32,
    pub description: Description,
    /// Roles a user must hold to run the operation.
    pub roles: Vec<Role>,
    pub steps: Vec<Step>,
    /// Triggers the operation may be bound to.
    pub triggers: Vec<Trigger>,
}

impl OperationSpecification {
    /// Creates a specification bindable to every trigger and requiring no roles.
    pub fn new(id: impl Into<String>, title: impl Into<String>, priority: u32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            priority,
            description: Description {
                short: String::new(),
                long: String::new(),
            },
            roles: Vec::new(),
            steps: Vec::new(),
            triggers: Trigger::ALL.to_vec(),
        }
    }

    pub fn describe(mut self, short: impl Into<String>, long: impl Into<String>) -> Self {
        self.description = Description {
            short: short.into(),
            long: long.into(),
        };
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_triggers(mut self, triggers: impl IntoIterator<Item = Trigger>) -> Self {
        self.triggers = triggers.into_iter().collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_specification_json_shape() {
        let spec = OperationSpecification::new("add_label", "Add Label", 5)
            .describe("Add a label", "Add a label to every matching hit")
            .with_roles([Role::AutomationBasic])
            .with_step(
                Step::new()
                    .arg("category")
                    .arg_depending_on("label", ["category"])
                    .options("category", ["generic", "threat"])
                    .validation("warn", "labels.$category:$label"),
            )
            .with_triggers([Trigger::Create, Trigger::Manual]);

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["id"], json!("add_label"));
        assert_eq!(value["description"]["short"], json!("Add a label"));
        assert_eq!(value["roles"], json!(["automation_basic"]));
        assert_eq!(value["steps"][0]["args"]["label"], json!(["category"]));
        assert_eq!(value["steps"][0]["options"]["category"], json!(["generic", "threat"]));
        assert_eq!(value["triggers"], json!(["create", "manual"]));
    }

    #[test]
    fn test_defaults_bind_every_trigger() {
        let spec = OperationSpecification::new("noop", "No-op", 0);
        assert_eq!(spec.triggers.len(), Trigger::ALL.len());
        assert!(spec.roles.is_empty());
    }
}

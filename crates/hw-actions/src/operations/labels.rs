//! Label operations.

use async_trait::async_trait;
use hw_core::{HitService, Query, Report, Role, UpdateOperation, User};
use tracing::instrument;

use super::{update_unless, UpdateMessages};
use crate::registry::{require_str, Operation, OperationError, Params};
use crate::specification::{OperationSpecification, Step};

/// Label categories a hit can carry.
pub const LABEL_CATEGORIES: [&str; 9] = [
    "assignments",
    "campaign",
    "generic",
    "insight",
    "mitigation",
    "operation",
    "threat",
    "tuning",
    "victim",
];

/// Reads and checks the `category` and `label` arguments.
fn label_args(params: &Params) -> Result<(&str, &str), OperationError> {
    let category = require_str(params, "category")?;
    if !LABEL_CATEGORIES.contains(&category) {
        return Err(OperationError::InvalidParameters(format!(
            "Unknown label category '{}', expected one of: {}",
            category,
            LABEL_CATEGORIES.join(", ")
        )));
    }
    let label = require_str(params, "label")?;
    Ok((category, label))
}

fn label_step() -> Step {
    Step::new()
        .arg("category")
        .arg_depending_on("label", ["category"])
        .options("category", LABEL_CATEGORIES)
}

/// Adds a label to every matching hit.
pub struct AddLabelOperation {
    service: HitService,
}

impl AddLabelOperation {
    pub fn new(service: HitService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Operation for AddLabelOperation {
    fn id(&self) -> &str {
        "add_label"
    }

    fn specification(&self) -> OperationSpecification {
        OperationSpecification::new("add_label", "Add Label", 5)
            .describe(
                "Add a label to a hit",
                "Adds a label in the given category to every matching hit. \
                 Hits that already carry the label are left untouched.",
            )
            .with_roles([Role::AutomationBasic])
            .with_step(label_step().validation("warn", "labels.$category:$label"))
    }

    #[instrument(skip(self, query, params, user), fields(query = %query))]
    async fn execute(
        &self,
        query: &Query,
        params: &Params,
        user: &User,
    ) -> Result<Report, OperationError> {
        let (category, label) = label_args(params)?;
        let field = format!("labels.{}", category);

        update_unless(
            &self.service,
            query,
            Query::term(field.clone(), label),
            &[UpdateOperation::append_if_missing(field, label)],
            user,
            UpdateMessages {
                success_title: "Label added",
                success_message: format!("Added label '{}' to {}", label, category),
                skipped_title: "Label already present",
                skipped_message: format!("These hits already carry the {} label '{}'", category, label),
            },
        )
        .await
    }
}

/// Removes a label from every matching hit.
pub struct RemoveLabelOperation {
    service: HitService,
}

impl RemoveLabelOperation {
    pub fn new(service: HitService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Operation for RemoveLabelOperation {
    fn id(&self) -> &str {
        "remove_label"
    }

    fn specification(&self) -> OperationSpecification {
        OperationSpecification::new("remove_label", "Remove Label", 6)
            .describe(
                "Remove a label from a hit",
                "Removes a label in the given category from every matching hit.",
            )
            .with_roles([Role::AutomationBasic])
            .with_step(label_step().validation("warn", "-labels.$category:$label"))
    }

    #[instrument(skip(self, query, params, user), fields(query = %query))]
    async fn execute(
        &self,
        query: &Query,
        params: &Params,
        user: &User,
    ) -> Result<Report, OperationError> {
        let (category, label) = label_args(params)?;
        let field = format!("labels.{}", category);

        update_unless(
            &self.service,
            query,
            Query::term(field.clone(), label).not(),
            &[UpdateOperation::remove(field, label)],
            user,
            UpdateMessages {
                success_title: "Label removed",
                success_message: format!("Removed label '{}' from {}", label, category),
                skipped_title: "Label not present",
                skipped_message: format!("These hits do not carry the {} label '{}'", category, label),
            },
        )
        .await
    }
}

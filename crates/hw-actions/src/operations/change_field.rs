//! Field change operation.

use async_trait::async_trait;
use hw_core::{HitService, Query, Report, ReportEntry, Role, UpdateOperation, User};
use serde_json::Value;
use tracing::{instrument, warn};

use super::{update_unless, UpdateMessages};
use crate::registry::{require_str, Operation, OperationError, Params};
use crate::specification::{OperationSpecification, Step};

/// Top-level fields automations may overwrite. Anything under `data.` is
/// changeable as well.
pub const CHANGEABLE_FIELDS: [&str; 3] = ["detection", "rationale", "score"];

enum FieldKind {
    Text,
    Number,
    Free,
}

fn field_kind(field: &str) -> Option<FieldKind> {
    match field {
        "detection" | "rationale" => Some(FieldKind::Text),
        "score" => Some(FieldKind::Number),
        _ if field.starts_with("data.") && field.len() > "data.".len() => Some(FieldKind::Free),
        _ => None,
    }
}

/// Sets one allow-listed field on every matching hit.
pub struct ChangeFieldOperation {
    service: HitService,
}

impl ChangeFieldOperation {
    pub fn new(service: HitService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Operation for ChangeFieldOperation {
    fn id(&self) -> &str {
        "change_field"
    }

    fn specification(&self) -> OperationSpecification {
        OperationSpecification::new("change_field", "Change Field", 10)
            .describe(
                "Change a field on a hit",
                "Sets a field to a new value on every matching hit. Only detection, \
                 rationale, score and fields under data may be changed.",
            )
            .with_roles([Role::AutomationAdvanced])
            .with_step(
                Step::new()
                    .arg("field")
                    .arg_depending_on("value", ["field"])
                    .validation("warn", "$field:$value"),
            )
    }

    #[instrument(skip(self, query, params, user), fields(query = %query))]
    async fn execute(
        &self,
        query: &Query,
        params: &Params,
        user: &User,
    ) -> Result<Report, OperationError> {
        let field = require_str(params, "field")?;
        let value = params.get("value").cloned().unwrap_or(Value::Null);

        let Some(kind) = field_kind(field) else {
            warn!(field, "Refusing to change protected field");
            return Ok(vec![ReportEntry::error(
                query.clone(),
                "Protected field",
                format!("Field '{}' cannot be changed by this operation", field),
            )]);
        };

        let valid = match kind {
            FieldKind::Text => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Free => !value.is_null(),
        };
        if !valid {
            return Err(OperationError::InvalidParameters(format!(
                "Value {} is not valid for field '{}'",
                value, field
            )));
        }

        let already = match &value {
            Value::String(s) => Query::term(field, s.as_str()),
            Value::Number(n) => Query::term(field, n.to_string()),
            Value::Bool(b) => Query::term(field, b.to_string()),
            _ => Query::Nothing,
        };

        update_unless(
            &self.service,
            query,
            already,
            &[UpdateOperation::set(field, value.clone())],
            user,
            UpdateMessages {
                success_title: "Field changed",
                success_message: format!("Set '{}' to {}", field, value),
                skipped_title: "Field unchanged",
                skipped_message: format!("'{}' already equals {}", field, value),
            },
        )
        .await
    }
}

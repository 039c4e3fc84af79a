//! Placeholder operation.
//!
//! Action templates reference this id until a real operation is chosen. The
//! dispatcher never runs it.

use async_trait::async_trait;
use hw_core::{Query, Report, ReportEntry, User};

use crate::registry::{Operation, OperationError, Params};
use crate::specification::OperationSpecification;

/// Reserved id of the placeholder operation.
pub const EXAMPLE_OPERATION_ID: &str = "example";

/// Does nothing and says so.
pub struct ExampleOperation;

#[async_trait]
impl Operation for ExampleOperation {
    fn id(&self) -> &str {
        EXAMPLE_OPERATION_ID
    }

    fn specification(&self) -> OperationSpecification {
        OperationSpecification::new(EXAMPLE_OPERATION_ID, "Example", 100).describe(
            "Placeholder operation",
            "Stands in for an operation in new actions. Running it changes nothing.",
        )
    }

    async fn execute(
        &self,
        query: &Query,
        _params: &Params,
        _user: &User,
    ) -> Result<Report, OperationError> {
        Ok(vec![ReportEntry::skipped(
            query.clone(),
            "Nothing to do",
            "The example operation makes no changes",
        )])
    }
}

//! Built-in operations.
//!
//! Every built-in acts through a [`HitService`] built without an automation
//! hook, so operations run by automations never re-fire triggers.

mod change_field;
mod escalation;
mod example;
mod external;
mod labels;
mod transition;

use hw_core::{HitService, HitStore, Query, Report, ReportEntry, UpdateOperation, User};
use std::sync::Arc;

use crate::registry::{Operation, OperationError};

pub use change_field::{ChangeFieldOperation, CHANGEABLE_FIELDS};
pub use escalation::{DemoteOperation, PromoteOperation};
pub use example::{ExampleOperation, EXAMPLE_OPERATION_ID};
pub use external::{ExternalPayload, ExternalSink, SendToExternalOperation, WebhookSink};
pub use labels::{AddLabelOperation, RemoveLabelOperation, LABEL_CATEGORIES};
pub use transition::TransitionOperation;

/// Builds the built-in operations.
///
/// `send_to_external` is only available when a sink is configured.
pub fn builtin_operations(
    service: &HitService,
    sink: Option<Arc<dyn ExternalSink>>,
) -> Vec<Arc<dyn Operation>> {
    let service = service.without_automation();
    let mut operations: Vec<Arc<dyn Operation>> = vec![
        Arc::new(AddLabelOperation::new(service.clone())),
        Arc::new(RemoveLabelOperation::new(service.clone())),
        Arc::new(ChangeFieldOperation::new(service.clone())),
        Arc::new(PromoteOperation::new(service.clone())),
        Arc::new(DemoteOperation::new(service.clone())),
        Arc::new(TransitionOperation::new(service.clone())),
        Arc::new(ExampleOperation),
    ];
    if let Some(sink) = sink {
        operations.push(Arc::new(SendToExternalOperation::new(service, sink)));
    }
    operations
}

/// Titles and messages for the entries of a conditional update.
struct UpdateMessages {
    success_title: &'static str,
    success_message: String,
    skipped_title: &'static str,
    skipped_message: String,
}

/// Applies `operations` to the hits matching `query` that do not already
/// match `already`, reporting the others as skipped.
///
/// Updated hits are addressed by id so the success entry keeps selecting
/// them after the update lands.
async fn update_unless(
    service: &HitService,
    query: &Query,
    already: Query,
    operations: &[UpdateOperation],
    user: &User,
    messages: UpdateMessages,
) -> Result<Report, OperationError> {
    let mut report = Vec::new();

    let done = query.clone().and(already.clone());
    if service.hits().count(&done).await? > 0 {
        report.push(ReportEntry::skipped(
            done,
            messages.skipped_title,
            messages.skipped_message,
        ));
    }

    let pending = query.clone().and(already.not());
    let row_cap = service.config().transitions.row_cap;
    let found = service.hits().search(&pending, row_cap).await?;
    if !found.items.is_empty() {
        let ids = Query::ids(found.items.iter().map(|hit| hit.id.clone()));
        service.update_hits(&ids, operations, user).await?;
        if found.total > found.items.len() as u64 {
            report.push(ReportEntry::skipped(
                pending.and(ids.clone().not()),
                "Row cap reached",
                format!(
                    "Only the first {} of {} hits were updated",
                    found.items.len(),
                    found.total
                ),
            ));
        }
        report.push(ReportEntry::success(
            ids,
            messages.success_title,
            messages.success_message,
        ));
    }

    if report.is_empty() {
        report.push(no_matches(query));
    }
    Ok(report)
}

fn no_matches(query: &Query) -> ReportEntry {
    ReportEntry::skipped(query.clone(), "No matching hits", "No hits matched the query")
}

#[cfg(test)]
pub(crate) mod test_support {
    use hw_core::events::EventBus;
    use hw_core::store::{MemoryAnalyticStore, MemoryHitStore};
    use hw_core::{hit_workflow, EngineConfig, Hit, HitService};
    use std::sync::Arc;

    pub fn service_with(hits: Vec<Hit>) -> (HitService, MemoryHitStore) {
        let store = MemoryHitStore::with_hits(hits).unwrap();
        let service = HitService::new(
            Arc::new(store.clone()),
            Arc::new(MemoryAnalyticStore::new()),
            Arc::new(hit_workflow().unwrap()),
            Arc::new(EventBus::default()),
            EngineConfig::default(),
        );
        (service, store)
    }
}

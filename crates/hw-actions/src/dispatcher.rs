//! Automation dispatcher.
//!
//! When a lifecycle trigger fires over a set of hits, every stored action
//! bound to that trigger runs its operations over the hits that also match
//! the action's own query. Dispatch is fire-and-forget: reports are logged,
//! and a failing action never fails the change that triggered it.

use async_trait::async_trait;
use hw_core::{
    ActionRecord, ActionStore, AutomationHook, HitStore, Outcome, Query, Report, ReportEntry,
    StoreError, Trigger, User,
};
use hw_observability::MetricsCollector;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::operations::EXAMPLE_OPERATION_ID;
use crate::registry::OperationRegistry;

/// Errors that stop a dispatch before any action runs.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown trigger: {0}")]
    UnknownTrigger(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Runs stored actions when triggers fire.
#[derive(Clone)]
pub struct AutomationDispatcher {
    actions: Arc<dyn ActionStore>,
    hits: Arc<dyn HitStore>,
    registry: Arc<OperationRegistry>,
    metrics: MetricsCollector,
}

impl AutomationDispatcher {
    pub fn new(
        actions: Arc<dyn ActionStore>,
        hits: Arc<dyn HitStore>,
        registry: Arc<OperationRegistry>,
    ) -> Self {
        Self {
            actions,
            hits,
            registry,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Runs every action bound to `trigger` over the hits matching `query`.
    ///
    /// Returns the combined report of every operation invoked.
    #[instrument(skip(self, query, user), fields(query = %query, user = %user.username))]
    pub async fn bulk_execute_on_query(
        &self,
        query: &Query,
        trigger: &str,
        user: &User,
    ) -> Result<Report, DispatchError> {
        let trigger = Trigger::from_str(trigger)
            .map_err(|_| DispatchError::UnknownTrigger(trigger.to_string()))?;
        self.metrics.record_dispatch(trigger.as_str());

        let actions = self.actions.find_by_trigger(trigger).await?;
        debug!(trigger = %trigger, actions = actions.len(), "Dispatching trigger");

        let mut report = Vec::new();
        for action in &actions {
            report.extend(self.run_action(action, query, user).await);
        }

        for entry in report.iter().filter(|e| e.outcome == Outcome::Error) {
            warn!(
                trigger = %trigger,
                title = %entry.title,
                message = %entry.message,
                query = %entry.query,
                "Automation reported an error"
            );
        }
        info!(
            trigger = %trigger,
            actions = actions.len(),
            entries = report.len(),
            "Automation dispatch complete"
        );
        Ok(report)
    }

    async fn run_action(&self, action: &ActionRecord, query: &Query, user: &User) -> Report {
        let intersected = query.clone().and(Query::raw(action.query.clone()));

        match self.hits.count(&intersected).await {
            Ok(0) => {
                debug!(action = %action.name, "No hits in action scope, skipping");
                return Vec::new();
            }
            Ok(_) => {}
            Err(e) => {
                warn!(action = %action.name, error = %e, "Failed to scope action");
                return vec![ReportEntry::error(
                    intersected,
                    "Action failed",
                    format!("Action '{}' could not be scoped: {}", action.name, e),
                )];
            }
        }

        let mut report = Vec::new();
        for entry in &action.operations {
            if entry.operation_id == EXAMPLE_OPERATION_ID {
                continue;
            }
            let params = match entry.parameters() {
                Ok(params) => params,
                Err(e) => {
                    report.push(ReportEntry::error(
                        intersected.clone(),
                        "Invalid action parameters",
                        e.to_string(),
                    ));
                    continue;
                }
            };
            debug!(action = %action.name, operation = %entry.operation_id, "Running action operation");
            report.extend(
                self.registry
                    .execute(&entry.operation_id, &intersected, user, &params)
                    .await,
            );
        }
        report
    }
}

#[async_trait]
impl AutomationHook for AutomationDispatcher {
    async fn on_trigger(&self, query: &Query, trigger: Trigger, user: &User) {
        if let Err(e) = self
            .bulk_execute_on_query(query, trigger.as_str(), user)
            .await
        {
            error!(trigger = %trigger, error = %e, "Automation dispatch failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Operation, OperationError, Params};
    use crate::specification::OperationSpecification;
    use hw_core::store::{MemoryActionStore, MemoryHitStore};
    use hw_core::{Hit, OperationEntry};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingOperation {
        id: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Operation for CountingOperation {
        fn id(&self) -> &str {
            self.id
        }

        fn specification(&self) -> OperationSpecification {
            OperationSpecification::new(self.id, "Counting", 1)
        }

        async fn execute(
            &self,
            query: &Query,
            _params: &Params,
            _user: &User,
        ) -> Result<Report, OperationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ReportEntry::success(query.clone(), "Counted", "Counted")])
        }
    }

    fn action(name: &str, query: &str, operations: Vec<OperationEntry>) -> ActionRecord {
        ActionRecord {
            id: name.to_string(),
            name: name.to_string(),
            owner: "admin".to_string(),
            query: query.to_string(),
            operations,
            triggers: vec![Trigger::Create],
        }
    }

    fn dispatcher(
        hits: Vec<Hit>,
        actions: Vec<ActionRecord>,
    ) -> (AutomationDispatcher, Arc<CountingOperation>) {
        let counting = Arc::new(CountingOperation {
            id: "count",
            calls: AtomicUsize::new(0),
        });
        let mut registry = OperationRegistry::new();
        registry.register(counting.clone());
        let dispatcher = AutomationDispatcher::new(
            Arc::new(MemoryActionStore::with_actions(actions)),
            Arc::new(MemoryHitStore::with_hits(hits).unwrap()),
            Arc::new(registry),
        );
        (dispatcher, counting)
    }

    #[tokio::test]
    async fn test_unknown_trigger_is_fatal() {
        let (dispatcher, _) = dispatcher(vec![], vec![]);
        let err = dispatcher
            .bulk_execute_on_query(&Query::All, "exploded", &User::system())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownTrigger(t) if t == "exploded"));
    }

    #[tokio::test]
    async fn test_empty_intersection_skips_action() {
        let hit = Hit::new("Beaconing", None, json!({}));
        let (dispatcher, counting) = dispatcher(
            vec![hit.clone()],
            vec![action(
                "other analytic",
                "analytic:Exfiltration",
                vec![OperationEntry::new("count", Default::default())],
            )],
        );

        let report = dispatcher
            .bulk_execute_on_query(&Query::ids([hit.id.clone()]), "create", &User::system())
            .await
            .unwrap();
        assert!(report.is_empty());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_example_operation_is_skipped() {
        let hit = Hit::new("Beaconing", None, json!({}));
        let (dispatcher, counting) = dispatcher(
            vec![hit],
            vec![action(
                "template",
                "*:*",
                vec![
                    OperationEntry::new(EXAMPLE_OPERATION_ID, Default::default()),
                    OperationEntry::with_json("count", "{}"),
                ],
            )],
        );

        let report = dispatcher
            .bulk_execute_on_query(&Query::All, "create", &User::system())
            .await
            .unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_parameters_reported() {
        let hit = Hit::new("Beaconing", None, json!({}));
        let (dispatcher, counting) = dispatcher(
            vec![hit],
            vec![action(
                "broken",
                "*:*",
                vec![OperationEntry::with_json("count", "not json")],
            )],
        );

        let report = dispatcher
            .bulk_execute_on_query(&Query::All, "create", &User::system())
            .await
            .unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].outcome, Outcome::Error);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    }
}

//! Workflow transition operation.

use async_trait::async_trait;
use hw_core::{HitService, HitStatus, Query, Report, Role, TransitionParams, User};
use tracing::instrument;

use crate::registry::{
    optional_parsed, optional_str, require_str, Operation, OperationError, Params,
};
use crate::specification::{OperationSpecification, Step};

/// Runs a workflow transition on every matching hit in a given status.
pub struct TransitionOperation {
    service: HitService,
}

impl TransitionOperation {
    pub fn new(service: HitService) -> Self {
        Self { service }
    }

    fn params(params: &Params) -> Result<TransitionParams, OperationError> {
        Ok(TransitionParams {
            assignee: optional_str(params, "assignee")?.map(str::to_string),
            assessment: optional_parsed(params, "assessment")?,
            rationale: optional_str(params, "rationale")?.map(str::to_string),
            vote: optional_parsed(params, "vote")?,
            escalation: optional_parsed(params, "escalation")?,
        })
    }
}

#[async_trait]
impl Operation for TransitionOperation {
    fn id(&self) -> &str {
        "transition"
    }

    fn specification(&self) -> OperationSpecification {
        let workflow = self.service.workflow();
        let mut step = Step::new()
            .arg("status")
            .arg_depending_on("transition", ["status"])
            .options("status", HitStatus::ALL.iter().map(|s| s.as_str()));
        for status in HitStatus::ALL {
            step = step.options(
                format!("transition:{}", status),
                workflow.get_transitions(status),
            );
        }

        OperationSpecification::new("transition", "Transition", 1)
            .describe(
                "Run a workflow transition",
                "Runs the chosen transition on every matching hit in the given \
                 status. Each hit succeeds or fails on its own.",
            )
            .with_roles([Role::AutomationAdvanced])
            .with_step(step.validation("error", "-status:$status"))
            .with_step(
                Step::new()
                    .arg("assignee")
                    .arg("assessment")
                    .arg("rationale")
                    .arg("vote")
                    .arg("escalation"),
            )
    }

    #[instrument(skip(self, query, params, user), fields(query = %query))]
    async fn execute(
        &self,
        query: &Query,
        params: &Params,
        user: &User,
    ) -> Result<Report, OperationError> {
        let status: HitStatus = require_str(params, "status")?
            .parse()
            .map_err(|e| OperationError::InvalidParameters(format!("Parameter 'status': {}", e)))?;
        let transition = require_str(params, "transition")?;

        let available = self.service.workflow().get_transitions(status);
        if !available.iter().any(|name| name == transition) {
            return Err(OperationError::InvalidParameters(format!(
                "Transition '{}' is not available from {}, expected one of: {}",
                transition,
                status,
                available.join(", ")
            )));
        }

        let scoped = query.clone().and(Query::term(
            self.service.workflow().status_field(),
            status.as_str(),
        ));
        let report = self
            .service
            .transition_hits(&scoped, transition, &Self::params(params)?, user)
            .await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::service_with;
    use hw_core::{Hit, HitStore, Outcome};
    use serde_json::json;

    fn params(value: serde_json::Value) -> Params {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_transition_only_touches_given_status() {
        let open = Hit::new("Beaconing", None, json!({"n": 1}));
        let held = Hit::new("Beaconing", None, json!({"n": 2}))
            .with_status(HitStatus::OnHold)
            .with_assignment("bob");
        let (service, store) = service_with(vec![open.clone(), held.clone()]);

        let report = TransitionOperation::new(service)
            .execute(
                &Query::All,
                &params(json!({"status": "open", "transition": "assign_to_other", "assignee": "carol"})),
                &User::system(),
            )
            .await
            .unwrap();

        assert_eq!(report.len(), 1);
        assert_eq!(report[0].outcome, Outcome::Success);
        let stored = store.get(&open.id).await.unwrap().unwrap().item;
        assert_eq!(stored.assignment, "carol");
        assert_eq!(stored.status, HitStatus::InProgress);
        let untouched = store.get(&held.id).await.unwrap().unwrap().item;
        assert_eq!(untouched.assignment, "bob");
    }

    #[tokio::test]
    async fn test_unavailable_transition_rejected() {
        let (service, _) = service_with(vec![]);
        let err = TransitionOperation::new(service)
            .execute(
                &Query::All,
                &params(json!({"status": "resolved", "transition": "pause"})),
                &User::system(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not available"));
    }
}

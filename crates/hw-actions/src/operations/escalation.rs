//! Bulk promote and demote operations.

use async_trait::async_trait;
use hw_core::{Assessment, Escalation, HitService, Query, Report, Role, UpdateOperation, User};
use tracing::instrument;

use super::{update_unless, UpdateMessages};
use crate::registry::{optional_parsed, optional_str, Operation, OperationError, Params};
use crate::specification::{OperationSpecification, Step};

/// Matches hits escalated to any of `tiers`.
fn escalated_to(tiers: &[Escalation]) -> Query {
    Query::any_of("escalation", tiers.iter().map(|t| t.as_str()))
}

/// Reads `assessment` and checks that it maps to `tier`.
fn assessment_for(params: &Params, tier: Escalation) -> Result<Assessment, OperationError> {
    let assessment: Assessment = optional_parsed(params, "assessment")?.ok_or_else(|| {
        OperationError::InvalidParameters(format!("Escalating to {} requires an assessment", tier))
    })?;
    if assessment.escalation() != tier {
        return Err(OperationError::InvalidParameters(format!(
            "Assessment '{}' does not escalate to {}",
            assessment, tier
        )));
    }
    Ok(assessment)
}

fn assessments_for(tier: Escalation) -> Vec<&'static str> {
    Assessment::ALL
        .iter()
        .filter(|a| a.escalation() == tier)
        .map(|a| a.as_str())
        .collect()
}

/// Raises matching hits to `alert` or `evidence`.
pub struct PromoteOperation {
    service: HitService,
}

impl PromoteOperation {
    pub fn new(service: HitService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Operation for PromoteOperation {
    fn id(&self) -> &str {
        "promote"
    }

    fn specification(&self) -> OperationSpecification {
        OperationSpecification::new("promote", "Promote", 3)
            .describe(
                "Promote hits to alert or evidence",
                "Raises the escalation of every matching hit. Promoting to evidence \
                 requires an assessment of recon, attempt, compromise or mitigated.",
            )
            .with_roles([Role::AutomationBasic])
            .with_step(
                Step::new()
                    .arg("escalation")
                    .arg_depending_on("assessment", ["escalation"])
                    .options("escalation", ["alert", "evidence"])
                    .options("assessment", assessments_for(Escalation::Evidence))
                    .validation("warn", "escalation:$escalation"),
            )
    }

    #[instrument(skip(self, query, params, user), fields(query = %query))]
    async fn execute(
        &self,
        query: &Query,
        params: &Params,
        user: &User,
    ) -> Result<Report, OperationError> {
        let target = optional_parsed(params, "escalation")?.unwrap_or(Escalation::Alert);

        let (already, operations) = match target {
            Escalation::Alert => (
                escalated_to(&[Escalation::Alert, Escalation::Evidence]),
                vec![
                    UpdateOperation::set("escalation", "alert"),
                    UpdateOperation::delete("assessment"),
                    UpdateOperation::delete("rationale"),
                ],
            ),
            Escalation::Evidence => {
                let assessment = assessment_for(params, Escalation::Evidence)?;
                let mut operations = vec![
                    UpdateOperation::set("escalation", "evidence"),
                    UpdateOperation::set("assessment", assessment.as_str()),
                ];
                if let Some(rationale) = optional_str(params, "rationale")? {
                    operations.push(UpdateOperation::set("rationale", rationale));
                }
                (escalated_to(&[Escalation::Evidence]), operations)
            }
            other => {
                return Err(OperationError::InvalidParameters(format!(
                    "Cannot promote to {}",
                    other
                )))
            }
        };

        update_unless(
            &self.service,
            query,
            already,
            &operations,
            user,
            UpdateMessages {
                success_title: "Promoted",
                success_message: format!("Promoted to {}", target),
                skipped_title: "Already escalated",
                skipped_message: format!("These hits are already at or above {}", target),
            },
        )
        .await
    }
}

/// Lowers matching hits to `hit` or `miss`.
pub struct DemoteOperation {
    service: HitService,
}

impl DemoteOperation {
    pub fn new(service: HitService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Operation for DemoteOperation {
    fn id(&self) -> &str {
        "demote"
    }

    fn specification(&self) -> OperationSpecification {
        OperationSpecification::new("demote", "Demote", 4)
            .describe(
                "Demote hits to hit or miss",
                "Lowers the escalation of every matching hit. Demoting to miss \
                 requires a non-malicious assessment.",
            )
            .with_roles([Role::AutomationBasic])
            .with_step(
                Step::new()
                    .arg("escalation")
                    .arg_depending_on("assessment", ["escalation"])
                    .options("escalation", ["hit", "miss"])
                    .options("assessment", assessments_for(Escalation::Miss))
                    .validation("warn", "escalation:$escalation"),
            )
    }

    #[instrument(skip(self, query, params, user), fields(query = %query))]
    async fn execute(
        &self,
        query: &Query,
        params: &Params,
        user: &User,
    ) -> Result<Report, OperationError> {
        let target = optional_parsed(params, "escalation")?.unwrap_or(Escalation::Hit);

        let (already, operations) = match target {
            Escalation::Hit => (
                escalated_to(&[Escalation::Hit, Escalation::Miss]),
                vec![
                    UpdateOperation::set("escalation", "hit"),
                    UpdateOperation::delete("assessment"),
                    UpdateOperation::delete("rationale"),
                ],
            ),
            Escalation::Miss => {
                let assessment = assessment_for(params, Escalation::Miss)?;
                let mut operations = vec![
                    UpdateOperation::set("escalation", "miss"),
                    UpdateOperation::set("assessment", assessment.as_str()),
                ];
                if let Some(rationale) = optional_str(params, "rationale")? {
                    operations.push(UpdateOperation::set("rationale", rationale));
                }
                (escalated_to(&[Escalation::Miss]), operations)
            }
            other => {
                return Err(OperationError::InvalidParameters(format!(
                    "Cannot demote to {}",
                    other
                )))
            }
        };

        update_unless(
            &self.service,
            query,
            already,
            &operations,
            user,
            UpdateMessages {
                success_title: "Demoted",
                success_message: format!("Demoted to {}", target),
                skipped_title: "Already demoted",
                skipped_message: format!("These hits are already at or below {}", target),
            },
        )
        .await
    }
}

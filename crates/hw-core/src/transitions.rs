//! Transition action library.
//!
//! Each action inspects a hit, the acting user and the transition parameters
//! and returns the [`UpdateOperation`]s the transition should apply. Actions
//! never write; invalid parameter combinations are reported as
//! [`InvalidDataError`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::InvalidDataError;
use crate::models::{Assessment, Escalation, Hit, HitStatus, User, Vote, UNASSIGNED};
use crate::update::UpdateOperation;

/// Caller-supplied transition parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionParams {
    /// Target user for `assign_to_other`.
    pub assignee: Option<String>,
    pub assessment: Option<Assessment>,
    pub rationale: Option<String>,
    pub vote: Option<Vote>,
    /// Target tier for `promote`/`demote`.
    pub escalation: Option<Escalation>,
}

impl TransitionParams {
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_assessment(mut self, assessment: Assessment) -> Self {
        self.assessment = Some(assessment);
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn with_vote(mut self, vote: Vote) -> Self {
        self.vote = Some(vote);
        self
    }

    pub fn with_escalation(mut self, escalation: Escalation) -> Self {
        self.escalation = Some(escalation);
        self
    }
}

/// Inputs to a transition action.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub hit: &'a Hit,
    pub user: &'a User,
    pub params: &'a TransitionParams,
}

impl<'a> TransitionContext<'a> {
    pub fn new(hit: &'a Hit, user: &'a User, params: &'a TransitionParams) -> Self {
        Self { hit, user, params }
    }
}

/// Who an assign action assigns the hit to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignee {
    /// The acting user.
    Actor,
    /// The `assignee` transition parameter.
    FromParams,
}

/// An action run during a workflow transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    Assign(Assignee),
    Unassign,
    /// Fails unless the hit is unassigned, assigned to the actor, or the
    /// actor is an admin.
    CheckOwnership,
    Assess,
    /// Drops assessment and rationale and resets escalation to `hit`.
    ClearAssessment,
    Promote,
    Demote,
    Vote,
}

impl TransitionAction {
    /// Computes the operations for this action.
    pub fn apply(&self, ctx: &TransitionContext<'_>) -> Result<Vec<UpdateOperation>, InvalidDataError> {
        match self {
            TransitionAction::Assign(assignee) => assign(ctx, *assignee),
            TransitionAction::Unassign => Ok(unassign(ctx)),
            TransitionAction::CheckOwnership => check_ownership(ctx).map(|_| Vec::new()),
            TransitionAction::Assess => assess(ctx),
            TransitionAction::ClearAssessment => Ok(clear_assessment(ctx)),
            TransitionAction::Promote => promote(ctx),
            TransitionAction::Demote => demote(ctx),
            TransitionAction::Vote => vote(ctx),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransitionAction::Assign(Assignee::Actor) => "assign_to_actor",
            TransitionAction::Assign(Assignee::FromParams) => "assign_to_param",
            TransitionAction::Unassign => "unassign",
            TransitionAction::CheckOwnership => "check_ownership",
            TransitionAction::Assess => "assess",
            TransitionAction::ClearAssessment => "clear_assessment",
            TransitionAction::Promote => "promote",
            TransitionAction::Demote => "demote",
            TransitionAction::Vote => "vote",
        }
    }
}

impl fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Assigns the hit to the actor or to the `assignee` parameter.
pub fn assign(
    ctx: &TransitionContext<'_>,
    assignee: Assignee,
) -> Result<Vec<UpdateOperation>, InvalidDataError> {
    let target = match assignee {
        Assignee::Actor => ctx.user.username.clone(),
        Assignee::FromParams => ctx
            .params
            .assignee
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| InvalidDataError::new("An assignee is required"))?
            .to_string(),
    };
    if target == UNASSIGNED {
        return Err(InvalidDataError::new(format!(
            "'{}' is not a valid assignee",
            UNASSIGNED
        )));
    }
    let explanation = format!("Assigned to {}", target);
    Ok(vec![UpdateOperation::set("assignment", target).explained(explanation)])
}

/// Releases the hit.
pub fn unassign(_ctx: &TransitionContext<'_>) -> Vec<UpdateOperation> {
    vec![UpdateOperation::set("assignment", UNASSIGNED).explained("Released")]
}

/// Fails if the hit belongs to someone else and the actor is not an admin.
pub fn check_ownership(ctx: &TransitionContext<'_>) -> Result<(), InvalidDataError> {
    let hit = ctx.hit;
    if hit.is_assigned() && hit.assignment != ctx.user.username && !ctx.user.is_admin() {
        return Err(InvalidDataError::new(format!(
            "Hit {} is assigned to {}; only its assignee or an admin can do this",
            hit.id, hit.assignment
        )));
    }
    Ok(())
}

/// Sets the assessment, its escalation tier and an optional rationale.
pub fn assess(ctx: &TransitionContext<'_>) -> Result<Vec<UpdateOperation>, InvalidDataError> {
    let assessment = ctx
        .params
        .assessment
        .ok_or_else(|| InvalidDataError::new("An assessment is required"))?;

    let mut ops = vec![
        UpdateOperation::set("assessment", assessment.as_str())
            .explained(format!("Assessed as {}", assessment)),
        UpdateOperation::set("escalation", assessment.escalation().as_str()),
    ];
    if let Some(rationale) = &ctx.params.rationale {
        ops.push(UpdateOperation::set("rationale", rationale.clone()));
    }
    Ok(ops)
}

/// Drops the assessment and rationale and resets the escalation tier.
pub fn clear_assessment(ctx: &TransitionContext<'_>) -> Vec<UpdateOperation> {
    let mut ops = vec![UpdateOperation::delete("assessment").explained("Re-evaluating")];
    if ctx.hit.rationale.is_some() {
        ops.push(UpdateOperation::delete("rationale"));
    }
    ops.push(UpdateOperation::set("escalation", Escalation::Hit.as_str()));
    ops
}

fn drop_assessment(hit: &Hit, ops: &mut Vec<UpdateOperation>) {
    if hit.assessment.is_some() {
        ops.push(UpdateOperation::delete("assessment"));
    }
    if hit.rationale.is_some() {
        ops.push(UpdateOperation::delete("rationale"));
    }
}

/// Chooses the assessment backing a miss/evidence tier: the parameter if
/// given, otherwise the hit's current one.
fn backing_assessment(
    ctx: &TransitionContext<'_>,
    target: Escalation,
) -> Result<Assessment, InvalidDataError> {
    let assessment = ctx.params.assessment.or(ctx.hit.assessment).ok_or_else(|| {
        InvalidDataError::new(format!("Escalating to {} requires an assessment", target))
    })?;
    if assessment.escalation() != target {
        return Err(InvalidDataError::new(format!(
            "Assessment {} does not match escalation {}",
            assessment, target
        )));
    }
    Ok(assessment)
}

fn change_escalation(
    ctx: &TransitionContext<'_>,
    target: Escalation,
) -> Result<Vec<UpdateOperation>, InvalidDataError> {
    let mut ops = vec![UpdateOperation::set("escalation", target.as_str())
        .explained(format!("Escalation changed to {}", target))];
    if target.requires_assessment() {
        let assessment = backing_assessment(ctx, target)?;
        if ctx.hit.assessment != Some(assessment) {
            ops.push(UpdateOperation::set("assessment", assessment.as_str()));
        }
        if let Some(rationale) = &ctx.params.rationale {
            ops.push(UpdateOperation::set("rationale", rationale.clone()));
        }
    } else {
        drop_assessment(ctx.hit, &mut ops);
    }
    Ok(ops)
}

/// Raises the escalation tier to `alert` (default) or `evidence`.
pub fn promote(ctx: &TransitionContext<'_>) -> Result<Vec<UpdateOperation>, InvalidDataError> {
    let target = ctx.params.escalation.unwrap_or(Escalation::Alert);
    if !matches!(target, Escalation::Alert | Escalation::Evidence) {
        return Err(InvalidDataError::new(format!(
            "Cannot promote to {}",
            target
        )));
    }
    if target.rank() <= ctx.hit.escalation.rank() {
        return Err(InvalidDataError::new(format!(
            "Hit {} is already escalated to {}",
            ctx.hit.id, ctx.hit.escalation
        )));
    }
    change_escalation(ctx, target)
}

/// Lowers the escalation tier to `hit` (default) or `miss`.
pub fn demote(ctx: &TransitionContext<'_>) -> Result<Vec<UpdateOperation>, InvalidDataError> {
    let target = ctx.params.escalation.unwrap_or(Escalation::Hit);
    if !matches!(target, Escalation::Hit | Escalation::Miss) {
        return Err(InvalidDataError::new(format!("Cannot demote to {}", target)));
    }
    if target.rank() >= ctx.hit.escalation.rank() {
        return Err(InvalidDataError::new(format!(
            "Hit {} is already at or below {}",
            ctx.hit.id, target
        )));
    }
    change_escalation(ctx, target)
}

/// Casts, changes or withdraws the actor's vote.
///
/// Any prior vote by the actor is removed; the new vote is added unless it
/// equals the prior one, so voting the same way twice withdraws the vote. An
/// assignee voting on an open or in-progress hit also releases and reopens it.
pub fn vote(ctx: &TransitionContext<'_>) -> Result<Vec<UpdateOperation>, InvalidDataError> {
    let vote = ctx
        .params
        .vote
        .ok_or_else(|| InvalidDataError::new("A vote is required"))?;
    let hit = ctx.hit;
    let voter = ctx.user.username.as_str();

    if hit.is_assigned() && hit.assignment != voter {
        return Err(InvalidDataError::new(format!(
            "Cannot vote on hit {} while it is assigned to {}",
            hit.id, hit.assignment
        )));
    }

    let mut ops = Vec::new();
    let prior = hit.votes.vote_of(voter);
    if let Some(prior) = prior {
        ops.push(UpdateOperation::remove(prior.field(), voter));
    }
    if prior != Some(vote) {
        ops.push(
            UpdateOperation::append(vote.field(), voter)
                .explained(format!("Voted {}", vote)),
        );
    }

    if hit.assignment == voter && matches!(hit.status, HitStatus::Open | HitStatus::InProgress) {
        ops.push(UpdateOperation::set("assignment", UNASSIGNED).explained("Released after voting"));
        ops.push(UpdateOperation::set("status", HitStatus::Open.as_str()));
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::update::OperationKind;
    use serde_json::{json, Value};

    fn hit() -> Hit {
        Hit::new("Beaconing", None, json!({}))
    }

    fn analyst(name: &str) -> User {
        User::new(name, [Role::User])
    }

    fn set_value<'a>(ops: &'a [UpdateOperation], field: &str) -> Option<&'a Value> {
        ops.iter()
            .find(|op| op.field == field && op.kind == OperationKind::Set)
            .map(|op| &op.value)
    }

    #[test]
    fn test_assign_to_param_requires_assignee() {
        let hit = hit();
        let user = analyst("alice");
        let params = TransitionParams::default();
        let ctx = TransitionContext::new(&hit, &user, &params);
        assert!(assign(&ctx, Assignee::FromParams).is_err());

        let params = TransitionParams::default().with_assignee("bob");
        let ctx = TransitionContext::new(&hit, &user, &params);
        let ops = assign(&ctx, Assignee::FromParams).unwrap();
        assert_eq!(set_value(&ops, "assignment"), Some(&json!("bob")));
    }

    #[test]
    fn test_ownership_check() {
        let hit = hit().with_assignment("bob");
        let params = TransitionParams::default();

        let alice = analyst("alice");
        assert!(check_ownership(&TransitionContext::new(&hit, &alice, &params)).is_err());

        let bob = analyst("bob");
        assert!(check_ownership(&TransitionContext::new(&hit, &bob, &params)).is_ok());

        let admin = User::new("root", [Role::Admin]);
        assert!(check_ownership(&TransitionContext::new(&hit, &admin, &params)).is_ok());
    }

    #[test]
    fn test_assess_sets_mapped_escalation() {
        let hit = hit();
        let user = analyst("alice");
        let params = TransitionParams::default()
            .with_assessment(Assessment::Compromise)
            .with_rationale("Confirmed C2");
        let ops = assess(&TransitionContext::new(&hit, &user, &params)).unwrap();
        assert_eq!(set_value(&ops, "assessment"), Some(&json!("compromise")));
        assert_eq!(set_value(&ops, "escalation"), Some(&json!("evidence")));
        assert_eq!(set_value(&ops, "rationale"), Some(&json!("Confirmed C2")));

        let params = TransitionParams::default();
        assert!(assess(&TransitionContext::new(&hit, &user, &params)).is_err());
    }

    #[test]
    fn test_promote_to_alert_drops_assessment() {
        let mut hit = hit();
        hit.escalation = Escalation::Miss;
        hit.assessment = Some(Assessment::Trivial);
        let user = analyst("alice");
        let params = TransitionParams::default();
        let ops = promote(&TransitionContext::new(&hit, &user, &params)).unwrap();
        assert_eq!(set_value(&ops, "escalation"), Some(&json!("alert")));
        assert!(ops
            .iter()
            .any(|op| op.field == "assessment" && op.kind == OperationKind::Delete));
    }

    #[test]
    fn test_promote_to_evidence_needs_evidence_assessment() {
        let hit = hit();
        let user = analyst("alice");
        let params = TransitionParams::default().with_escalation(Escalation::Evidence);
        assert!(promote(&TransitionContext::new(&hit, &user, &params)).is_err());

        let params = params.with_assessment(Assessment::Trivial);
        assert!(promote(&TransitionContext::new(&hit, &user, &params)).is_err());

        let params = params.with_assessment(Assessment::Attempt);
        let ops = promote(&TransitionContext::new(&hit, &user, &params)).unwrap();
        assert_eq!(set_value(&ops, "assessment"), Some(&json!("attempt")));
    }

    #[test]
    fn test_promote_rejects_non_increase() {
        let mut hit = hit();
        hit.escalation = Escalation::Alert;
        let user = analyst("alice");
        let params = TransitionParams::default();
        assert!(promote(&TransitionContext::new(&hit, &user, &params)).is_err());
        let params = TransitionParams::default().with_escalation(Escalation::Miss);
        assert!(promote(&TransitionContext::new(&hit, &user, &params)).is_err());
    }

    #[test]
    fn test_demote_to_miss_requires_assessment() {
        let mut hit = hit();
        hit.escalation = Escalation::Alert;
        let user = analyst("alice");
        let params = TransitionParams::default().with_escalation(Escalation::Miss);
        assert!(demote(&TransitionContext::new(&hit, &user, &params)).is_err());

        let params = params.with_assessment(Assessment::FalsePositive);
        let ops = demote(&TransitionContext::new(&hit, &user, &params)).unwrap();
        assert_eq!(set_value(&ops, "escalation"), Some(&json!("miss")));
        assert_eq!(set_value(&ops, "assessment"), Some(&json!("false-positive")));

        let params = TransitionParams::default();
        let ops = demote(&TransitionContext::new(&hit, &user, &params)).unwrap();
        assert_eq!(set_value(&ops, "escalation"), Some(&json!("hit")));
    }

    #[test]
    fn test_vote_moves_between_buckets() {
        let mut hit = hit();
        hit.votes.benign.push("alice".into());
        let user = analyst("alice");
        let params = TransitionParams::default().with_vote(Vote::Malicious);
        let ops = vote(&TransitionContext::new(&hit, &user, &params)).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].kind, OperationKind::Remove);
        assert_eq!(ops[0].field, "votes.benign");
        assert_eq!(ops[1].kind, OperationKind::Append);
        assert_eq!(ops[1].field, "votes.malicious");
    }

    #[test]
    fn test_same_vote_withdraws() {
        let mut hit = hit();
        hit.votes.obscure.push("alice".into());
        let user = analyst("alice");
        let params = TransitionParams::default().with_vote(Vote::Obscure);
        let ops = vote(&TransitionContext::new(&hit, &user, &params)).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Remove);
    }

    #[test]
    fn test_assignee_vote_releases_and_reopens() {
        let hit = hit()
            .with_assignment("alice")
            .with_status(HitStatus::InProgress);
        let user = analyst("alice");
        let params = TransitionParams::default().with_vote(Vote::Benign);
        let ops = vote(&TransitionContext::new(&hit, &user, &params)).unwrap();
        assert_eq!(set_value(&ops, "assignment"), Some(&json!("unassigned")));
        assert_eq!(set_value(&ops, "status"), Some(&json!("open")));
    }

    #[test]
    fn test_vote_on_hit_assigned_to_other_fails() {
        let hit = hit().with_assignment("bob");
        let user = analyst("alice");
        let params = TransitionParams::default().with_vote(Vote::Benign);
        assert!(vote(&TransitionContext::new(&hit, &user, &params)).is_err());
    }
}

//! Hit workflow state machine.
//!
//! A [`Workflow`] is a validated table of transitions. Each entry maps a set
//! of source statuses and a transition name to an optional destination status
//! and an ordered list of [`TransitionAction`]s. Running a transition merges
//! the operations of every action and, when a destination is declared and no
//! action already set the status, appends the status change.
//!
//! Lookup is by `(current status, name)` first, falling back to an entry that
//! accepts any source.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::error::InvalidDataError;
use crate::models::HitStatus;
use crate::transitions::{Assignee, TransitionAction, TransitionContext};
use crate::update::UpdateOperation;

/// Errors that can occur in workflow processing.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Workflow status field cannot be empty")]
    EmptyStatusField,

    #[error("Transition name cannot be empty")]
    EmptyTransitionName,

    #[error("Transition '{0}' declares an empty source set")]
    EmptySource(String),

    #[error("Duplicate transition '{transition}' from {source_status}")]
    DuplicateTransition {
        transition: String,
        source_status: String,
    },

    #[error("Current status '{status}' does not allow the '{transition}' transition")]
    TransitionNotAllowed {
        status: HitStatus,
        transition: String,
    },

    #[error("Transition '{transition}' produces conflicting updates to '{field}'")]
    ConflictingOperations { transition: String, field: String },

    #[error(transparent)]
    InvalidData(#[from] InvalidDataError),
}

impl WorkflowError {
    /// Whether the error was caused by the caller rather than by a malformed
    /// transition table.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            WorkflowError::TransitionNotAllowed { .. }
                | WorkflowError::ConflictingOperations { .. }
                | WorkflowError::InvalidData(_)
        )
    }
}

/// Statuses a transition may start from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Any status.
    Any,
    /// One of the listed statuses.
    Only(Vec<HitStatus>),
}

impl Source {
    /// Whether a hit in `status` may take the transition.
    pub fn allows(&self, status: HitStatus) -> bool {
        match self {
            Source::Any => true,
            Source::Only(statuses) => statuses.contains(&status),
        }
    }
}

/// One entry of the transition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub source: Source,
    pub transition: String,
    /// Status after the transition; `None` leaves it unchanged.
    pub dest: Option<HitStatus>,
    pub actions: Vec<TransitionAction>,
}

impl Transition {
    /// Creates a transition available from any status.
    pub fn new(transition: impl Into<String>) -> Self {
        Self {
            source: Source::Any,
            transition: transition.into().trim().to_string(),
            dest: None,
            actions: Vec::new(),
        }
    }

    /// Restricts the source statuses.
    pub fn from(mut self, statuses: impl IntoIterator<Item = HitStatus>) -> Self {
        self.source = Source::Only(statuses.into_iter().collect());
        self
    }

    /// Sets the destination status.
    pub fn to(mut self, dest: HitStatus) -> Self {
        self.dest = Some(dest);
        self
    }

    /// Sets the action list.
    pub fn with_actions(mut self, actions: impl IntoIterator<Item = TransitionAction>) -> Self {
        self.actions = actions.into_iter().collect();
        self
    }
}

/// A validated transition table.
#[derive(Debug, Clone)]
pub struct Workflow {
    status_field: String,
    transitions: Vec<Transition>,
    by_source: HashMap<(HitStatus, String), usize>,
    any_source: HashMap<String, usize>,
}

impl Workflow {
    /// Validates and indexes a transition table.
    ///
    /// Rejects empty names, empty source sets, and entries whose
    /// `(source status, name)` keys overlap another entry's.
    pub fn new(
        status_field: impl Into<String>,
        mut transitions: Vec<Transition>,
    ) -> Result<Self, WorkflowError> {
        let status_field = status_field.into();
        if status_field.trim().is_empty() {
            return Err(WorkflowError::EmptyStatusField);
        }

        for transition in &mut transitions {
            transition.transition = transition.transition.trim().to_string();
        }

        let mut by_source = HashMap::new();
        let mut any_source = HashMap::new();
        for (index, transition) in transitions.iter().enumerate() {
            let name = transition.transition.as_str();
            if name.is_empty() {
                return Err(WorkflowError::EmptyTransitionName);
            }
            match &transition.source {
                Source::Any => {
                    if any_source.insert(name.to_string(), index).is_some() {
                        return Err(WorkflowError::DuplicateTransition {
                            transition: name.to_string(),
                            source_status: "any status".to_string(),
                        });
                    }
                }
                Source::Only(statuses) if statuses.is_empty() => {
                    return Err(WorkflowError::EmptySource(name.to_string()));
                }
                Source::Only(statuses) => {
                    for status in statuses {
                        if by_source
                            .insert((*status, name.to_string()), index)
                            .is_some()
                        {
                            return Err(WorkflowError::DuplicateTransition {
                                transition: name.to_string(),
                                source_status: status.to_string(),
                            });
                        }
                    }
                }
            }
        }

        Ok(Self {
            status_field,
            transitions,
            by_source,
            any_source,
        })
    }

    /// The document field holding the status.
    pub fn status_field(&self) -> &str {
        &self.status_field
    }

    /// All transitions, in table order.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    fn lookup(&self, status: HitStatus, name: &str) -> Option<&Transition> {
        self.by_source
            .get(&(status, name.trim().to_string()))
            .or_else(|| self.any_source.get(name.trim()))
            .map(|index| &self.transitions[*index])
            .filter(|transition| transition.source.allows(status))
    }

    /// Computes the operations for taking `name` from `status`.
    #[instrument(skip(self, ctx), fields(hit_id = %ctx.hit.id))]
    pub fn transition(
        &self,
        status: HitStatus,
        name: &str,
        ctx: &TransitionContext<'_>,
    ) -> Result<Vec<UpdateOperation>, WorkflowError> {
        let transition =
            self.lookup(status, name)
                .ok_or_else(|| WorkflowError::TransitionNotAllowed {
                    status,
                    transition: name.to_string(),
                })?;

        let mut operations: Vec<UpdateOperation> = Vec::new();
        for action in &transition.actions {
            for operation in action.apply(ctx)? {
                match operations.iter().find(|op| op.field == operation.field) {
                    Some(existing) if existing.same_effect(&operation) => {}
                    Some(_) => {
                        return Err(WorkflowError::ConflictingOperations {
                            transition: name.to_string(),
                            field: operation.field,
                        })
                    }
                    None => operations.push(operation),
                }
            }
        }

        if let Some(dest) = transition.dest {
            if !operations.iter().any(|op| op.field == self.status_field) {
                operations.push(
                    UpdateOperation::set(self.status_field.clone(), dest.as_str())
                        .explained(format!("Status changed by {}", name)),
                );
            }
        }

        debug!(
            transition = %name,
            status = %status,
            operations = operations.len(),
            "Computed transition operations"
        );
        Ok(operations)
    }

    /// Names of the transitions available from `status`, sorted.
    pub fn get_transitions(&self, status: HitStatus) -> Vec<String> {
        let names: BTreeSet<&str> = self
            .transitions
            .iter()
            .filter(|t| t.source.allows(status))
            .map(|t| t.transition.as_str())
            .collect();
        names.into_iter().map(str::to_string).collect()
    }
}

/// The default hit workflow.
pub fn hit_workflow() -> Result<Workflow, WorkflowError> {
    use HitStatus::{InProgress, OnHold, Open, Resolved};
    use TransitionAction::*;

    Workflow::new(
        "status",
        vec![
            Transition::new("assign_to_me")
                .from([Open])
                .to(InProgress)
                .with_actions([Assign(Assignee::Actor)]),
            Transition::new("assign_to_me")
                .from([InProgress, OnHold])
                .with_actions([Assign(Assignee::Actor)]),
            Transition::new("assign_to_other")
                .from([Open])
                .to(InProgress)
                .with_actions([Assign(Assignee::FromParams)]),
            Transition::new("assign_to_other")
                .from([InProgress, OnHold])
                .with_actions([CheckOwnership, Assign(Assignee::FromParams)]),
            Transition::new("start")
                .from([Open])
                .to(InProgress)
                .with_actions([Assign(Assignee::Actor)]),
            Transition::new("release")
                .from([InProgress, OnHold])
                .to(Open)
                .with_actions([CheckOwnership, Unassign]),
            Transition::new("pause")
                .from([InProgress])
                .to(OnHold)
                .with_actions([CheckOwnership]),
            Transition::new("resume")
                .from([OnHold])
                .to(InProgress)
                .with_actions([CheckOwnership]),
            Transition::new("assess")
                .from([Open, InProgress, OnHold])
                .to(Resolved)
                .with_actions([CheckOwnership, Assess]),
            Transition::new("re_evaluate")
                .from([Resolved])
                .to(InProgress)
                .with_actions([ClearAssessment]),
            Transition::new("promote").with_actions([Promote]),
            Transition::new("demote").with_actions([Demote]),
            Transition::new("vote").with_actions([Vote]),
        ],
    )
}

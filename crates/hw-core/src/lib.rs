//! # hw-core
//!
//! Core triage models and services for Hitwarden.
//!
//! This crate provides the hit data model, the hit workflow state machine and
//! its transition action library, the document store interfaces consumed by
//! the triage core, the bulk update coordinator, and the hit service that
//! ingests hits and runs bulk transitions.

pub mod automation;
pub mod bulk;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod query;
pub mod report;
pub mod service;
pub mod store;
pub mod transitions;
pub mod update;
pub mod workflow;

pub use automation::AutomationHook;
pub use bulk::BulkCoordinator;
pub use config::EngineConfig;
pub use error::InvalidDataError;
pub use events::{EventBus, Notifier, TriageEvent};
pub use models::{
    ActionRecord, Analytic, Assessment, Escalation, Hit, HitStatus, OperationEntry, Role,
    RuleType, Trigger, User, Vote,
};
pub use query::Query;
pub use report::{sanitize, Outcome, Report, ReportEntry};
pub use service::{HitService, ServiceError};
pub use store::{ActionStore, AnalyticStore, HitStore, StoreError};
pub use transitions::{TransitionAction, TransitionContext, TransitionParams};
pub use update::{OperationKind, UpdateOperation};
pub use workflow::{hit_workflow, Source, Transition, Workflow, WorkflowError};

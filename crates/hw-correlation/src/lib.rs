//! # hw-correlation
//!
//! Correlation for Hitwarden.
//!
//! This crate evaluates analyst-authored rules on a cron schedule and groups
//! the hits each rule finds into bundles. A bundle's identity is a content
//! hash of the rule and its matches, so re-running an unchanged rule reuses
//! the existing bundle.

pub mod bundle;
pub mod engine;
pub mod rules;
pub mod scheduler;

pub use bundle::{bundle_hash, BundleOutcome};
pub use engine::{CorrelationEngine, CorrelationError};
pub use rules::{Rule, RuleError, RuleMatch};
pub use scheduler::{Job, JobScheduler, SchedulerError};

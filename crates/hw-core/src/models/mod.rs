//! Data models for hits, automation actions, analytics and users.

mod action;
mod analytic;
mod hit;
mod user;

pub use action::{ActionRecord, OperationEntry, Trigger};
pub use analytic::{Analytic, RuleType};
pub use hit::{Assessment, Escalation, Hit, HitStatus, LogEntry, Vote, Votes, UNASSIGNED};
pub use user::{Role, User};

//! # hw-actions
//!
//! Operations and automation dispatch for Hitwarden.
//!
//! This crate provides the operation registry, the built-in bulk operations
//! analysts and automations run over hit queries, and the dispatcher that
//! executes stored actions when a lifecycle trigger fires.

pub mod dispatcher;
pub mod operations;
pub mod registry;
pub mod specification;

pub use dispatcher::{AutomationDispatcher, DispatchError};
pub use operations::{builtin_operations, ExternalPayload, ExternalSink, WebhookSink};
pub use registry::{Operation, OperationError, OperationExtension, OperationRegistry, Params};
pub use specification::{Description, OperationSpecification, Step};

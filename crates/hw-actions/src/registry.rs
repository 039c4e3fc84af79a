//! Operation registry for Hitwarden.
//!
//! This module provides the operation trait and the registry that resolves
//! operations by id and runs them over a hit query.
//!
//! # Dispatch
//!
//! [`OperationRegistry::execute`] never fails. An unknown operation id, a
//! caller missing one of the operation's roles, or an operation error each
//! become a single `error` report entry. Successful reports are sanitized so
//! identical messages are merged into one entry.

use async_trait::async_trait;
use hw_core::report::has_errors;
use hw_core::{sanitize, Query, Report, ReportEntry, ServiceError, StoreError, User};
use hw_observability::MetricsCollector;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::specification::OperationSpecification;

/// Operation arguments, keyed by argument name.
pub type Params = Map<String, Value>;

/// Errors that can occur during operation execution.
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("External system error: {0}")]
    External(String),
}

/// Trait for operation implementations.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Returns the operation id.
    fn id(&self) -> &str;

    /// Returns the operation specification.
    fn specification(&self) -> OperationSpecification;

    /// Runs the operation over every hit matching `query`.
    ///
    /// Each report entry's query must select exactly the hits it concerns.
    async fn execute(
        &self,
        query: &Query,
        params: &Params,
        user: &User,
    ) -> Result<Report, OperationError>;
}

/// A bundle of operations supplied from outside this crate.
pub trait OperationExtension: Send + Sync {
    /// Returns the extension name.
    fn name(&self) -> &str;

    /// Returns the operations this extension contributes.
    fn operations(&self) -> Vec<Arc<dyn Operation>>;
}

/// Registry of available operations.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    local: HashMap<String, Arc<dyn Operation>>,
    extended: HashMap<String, Arc<dyn Operation>>,
    metrics: MetricsCollector,
}

impl OperationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            local: HashMap::new(),
            extended: HashMap::new(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Registers a local operation, replacing any earlier one with the same id.
    pub fn register(&mut self, operation: Arc<dyn Operation>) {
        let id = operation.id().to_string();
        info!(operation = %id, "Registering operation");
        self.local.insert(id, operation);
    }

    /// Loads an extension's operations.
    ///
    /// An extension cannot shadow a local operation or one contributed by an
    /// earlier extension.
    pub fn load_extension(&mut self, extension: &dyn OperationExtension) {
        for operation in extension.operations() {
            let id = operation.id().to_string();
            if self.local.contains_key(&id) || self.extended.contains_key(&id) {
                warn!(
                    extension = %extension.name(),
                    operation = %id,
                    "Operation already registered, ignoring extension copy"
                );
                continue;
            }
            debug!(extension = %extension.name(), operation = %id, "Loaded extension operation");
            self.extended.insert(id, operation);
        }
    }

    /// Resolves an operation by id. Local operations take precedence.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Operation>> {
        self.local
            .get(id)
            .or_else(|| self.extended.get(id))
            .cloned()
    }

    /// Returns the ids of all resolvable operations, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .local
            .keys()
            .chain(self.extended.keys())
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Returns the specifications of all resolvable operations, ordered by
    /// priority then id.
    pub fn specifications(&self) -> Vec<OperationSpecification> {
        let mut specs: Vec<OperationSpecification> = self
            .list()
            .iter()
            .filter_map(|id| self.get(id))
            .map(|op| op.specification())
            .collect();
        specs.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        specs
    }

    /// Runs an operation by id on behalf of `user`.
    #[instrument(skip(self, query, user, params), fields(operation = %operation_id, user = %user.username))]
    pub async fn execute(
        &self,
        operation_id: &str,
        query: &Query,
        user: &User,
        params: &Params,
    ) -> Report {
        let Some(operation) = self.get(operation_id) else {
            warn!("Operation not found");
            self.metrics.record_operation(operation_id, "not_found", 0.0);
            return vec![ReportEntry::error(
                query.clone(),
                "Unknown operation",
                format!("Operation '{}' does not exist", operation_id),
            )];
        };

        let specification = operation.specification();
        let missing = user.missing_roles(&specification.roles);
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|r| r.as_str()).collect();
            warn!(missing = ?names, "User lacks roles for operation");
            self.metrics.record_operation(operation_id, "unauthorized", 0.0);
            return vec![ReportEntry::error(
                query.clone(),
                "Insufficient roles",
                format!(
                    "User '{}' is missing required roles for '{}': {}",
                    user.username,
                    operation_id,
                    names.join(", ")
                ),
            )];
        }

        let started = Instant::now();
        let report = match operation.execute(query, params, user).await {
            Ok(report) => sanitize(report),
            Err(e) => {
                warn!(error = %e, "Operation failed");
                vec![ReportEntry::error(
                    query.clone(),
                    "Operation failed",
                    e.to_string(),
                )]
            }
        };

        let outcome = if has_errors(&report) { "error" } else { "success" };
        self.metrics
            .record_operation(operation_id, outcome, started.elapsed().as_secs_f64());
        info!(outcome, entries = report.len(), "Operation executed");
        report
    }
}

/// Reads a required string argument.
pub fn require_str<'a>(params: &'a Params, key: &str) -> Result<&'a str, OperationError> {
    optional_str(params, key)?.ok_or_else(|| {
        OperationError::InvalidParameters(format!("Missing required parameter: {}", key))
    })
}

/// Reads an optional string argument. Empty strings count as absent.
pub fn optional_str<'a>(params: &'a Params, key: &str) -> Result<Option<&'a str>, OperationError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(OperationError::InvalidParameters(format!(
            "Parameter '{}' must be a string, got {}",
            key, other
        ))),
    }
}

/// Parses an optional argument through `FromStr`.
pub fn optional_parsed<T>(params: &Params, key: &str) -> Result<Option<T>, OperationError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_str(params, key)?
        .map(|raw| {
            raw.parse::<T>().map_err(|e| {
                OperationError::InvalidParameters(format!("Parameter '{}': {}", key, e))
            })
        })
        .transpose()
}

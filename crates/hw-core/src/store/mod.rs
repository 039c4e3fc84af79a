//! Document store interfaces consumed by the triage core.
//!
//! The backing store is an external collaborator; these traits are the narrow
//! CRUD-plus-query surface the workflow, automation and correlation code
//! needs. Hits carry an optimistic-concurrency version.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::InvalidDataError;
use crate::models::{ActionRecord, Analytic, Hit, Trigger};
use crate::query::{Query, QueryError};
use crate::update::UpdateOperation;

pub use memory::{MemoryActionStore, MemoryAnalyticStore, MemoryHitStore};

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// The store did not answer in time.
    #[error("Store connection timed out: {0}")]
    ConnectionTimeout(String),

    /// The store rejected the credentials.
    #[error("Store authentication failed: {0}")]
    Authentication(String),

    /// The store answered with an error status.
    #[error("Store transport error ({status}): {message}")]
    Transport { status: u16, message: String },

    /// Record not found.
    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    /// Optimistic concurrency check failed.
    #[error("Version conflict on {id}: expected version {expected}, found {actual}")]
    VersionConflict {
        id: String,
        expected: Version,
        actual: Version,
    },

    /// The store could not interpret a query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A write would leave a document in an invalid state.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the error is worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Connection(_)
            | StoreError::ConnectionTimeout(_)
            | StoreError::Authentication(_) => true,
            // Overloaded or rate limited
            StoreError::Transport { status, .. } => matches!(status, 429 | 503),
            StoreError::NotFound { .. }
            | StoreError::VersionConflict { .. }
            | StoreError::InvalidQuery(_)
            | StoreError::InvalidData(_)
            | StoreError::Serialization(_) => false,
        }
    }
}

impl From<QueryError> for StoreError {
    fn from(err: QueryError) -> Self {
        StoreError::InvalidQuery(err.to_string())
    }
}

impl From<InvalidDataError> for StoreError {
    fn from(err: InvalidDataError) -> Self {
        StoreError::InvalidData(err.to_string())
    }
}

/// Optimistic-concurrency version of a stored document.
pub type Version = u64;

/// A stored item with its current version.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub item: T,
    pub version: Version,
}

/// A page of search results.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult<T> {
    pub items: Vec<T>,
    /// Total number of matches, which may exceed `items.len()`.
    pub total: u64,
}

/// Store of hit and bundle documents.
#[async_trait]
pub trait HitStore: Send + Sync {
    /// Returns up to `rows` hits matching `query`, oldest first.
    async fn search(&self, query: &Query, rows: usize) -> Result<SearchResult<Hit>, StoreError>;

    /// Counts hits matching `query`.
    async fn count(&self, query: &Query) -> Result<u64, StoreError>;

    /// Gets a hit with its version.
    async fn get(&self, id: &str) -> Result<Option<Versioned<Hit>>, StoreError>;

    /// Saves a hit. With `expected_version` the write only succeeds if the
    /// stored version still matches.
    async fn save(&self, hit: &Hit, expected_version: Option<Version>)
        -> Result<Version, StoreError>;

    /// Applies operations to every hit matching `query`, returning how many
    /// hits were updated.
    async fn update_by_query(
        &self,
        query: &Query,
        operations: &[UpdateOperation],
    ) -> Result<u64, StoreError>;

    /// Indexes many hits in one submission.
    async fn bulk(&self, hits: &[Hit]) -> Result<(), StoreError>;

    /// Deletes every hit matching `query`, returning how many were removed.
    async fn delete_by_query(&self, query: &Query) -> Result<u64, StoreError>;

    /// Makes preceding writes visible to searches.
    async fn commit(&self) -> Result<(), StoreError>;

    /// Drops and re-establishes the connection.
    async fn reset_connection(&self) {}
}

/// Store of automation actions.
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Lists actions that fire on `trigger`.
    async fn find_by_trigger(&self, trigger: Trigger) -> Result<Vec<ActionRecord>, StoreError>;

    async fn list(&self) -> Result<Vec<ActionRecord>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<ActionRecord>, StoreError>;

    /// Creates or replaces an action.
    async fn save(&self, action: &ActionRecord) -> Result<(), StoreError>;

    /// Deletes an action. Returns false if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Store of analytics and their correlation rules.
#[async_trait]
pub trait AnalyticStore: Send + Sync {
    /// Lists analytics carrying a non-empty rule.
    async fn list_with_rules(&self) -> Result<Vec<Analytic>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Analytic>, StoreError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Analytic>, StoreError>;

    /// Returns the analytic named `name`, creating it if absent.
    async fn upsert_by_name(&self, name: &str) -> Result<Analytic, StoreError>;

    /// Creates or replaces an analytic.
    async fn save(&self, analytic: &Analytic) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Connection("refused".into()).is_transient());
        assert!(StoreError::ConnectionTimeout("30s".into()).is_transient());
        assert!(StoreError::Authentication("expired token".into()).is_transient());
        assert!(StoreError::Transport {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(StoreError::Transport {
            status: 429,
            message: "too many requests".into()
        }
        .is_transient());
        assert!(!StoreError::Transport {
            status: 400,
            message: "bad request".into()
        }
        .is_transient());
        assert!(!StoreError::InvalidQuery("x".into()).is_transient());
        assert!(!StoreError::VersionConflict {
            id: "h".into(),
            expected: 1,
            actual: 2
        }
        .is_transient());
    }
}

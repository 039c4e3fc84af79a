//! Bulk update coordination.
//!
//! Wraps store submissions with retry on transient failures. Retries are
//! unbounded: the sleep between attempts grows by one second per retry up to
//! `max_backoff_seconds`, and the store connection is reset before each
//! retry. Any other error is returned immediately. Callers that need an upper
//! bound must impose their own timeout.

use hw_observability::MetricsCollector;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::BulkConfig;
use crate::models::Hit;
use crate::query::Query;
use crate::store::{HitStore, StoreError, Version};
use crate::update::UpdateOperation;

/// Submits writes to a [`HitStore`], retrying transient failures.
#[derive(Clone)]
pub struct BulkCoordinator {
    store: Arc<dyn HitStore>,
    max_backoff_seconds: u64,
    metrics: MetricsCollector,
}

impl BulkCoordinator {
    /// Creates a coordinator.
    pub fn new(store: Arc<dyn HitStore>, config: &BulkConfig) -> Self {
        Self {
            store,
            max_backoff_seconds: config.max_backoff_seconds,
            metrics: MetricsCollector::new(),
        }
    }

    /// The wrapped store.
    pub fn store(&self) -> &Arc<dyn HitStore> {
        &self.store
    }

    /// Runs a store call until it succeeds or fails with a non-transient error.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, f: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut retries: u64 = 0;
        loop {
            match f().await {
                Ok(result) => {
                    if retries > 0 {
                        debug!(
                            operation = %operation_name,
                            retries,
                            "Store submission succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if e.is_transient() => {
                    retries += 1;
                    let delay = Duration::from_secs(retries.min(self.max_backoff_seconds));
                    warn!(
                        operation = %operation_name,
                        retries,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Transient store error, retrying"
                    );
                    self.metrics.record_bulk_retry(operation_name);
                    sleep(delay).await;
                    self.store.reset_connection().await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Applies operations to every hit matching `query`.
    pub async fn update_by_query(
        &self,
        query: &Query,
        operations: &[UpdateOperation],
    ) -> Result<u64, StoreError> {
        self.run("update_by_query", || {
            self.store.update_by_query(query, operations)
        })
        .await
    }

    /// Indexes many hits.
    pub async fn bulk(&self, hits: &[Hit]) -> Result<(), StoreError> {
        self.run("bulk", || self.store.bulk(hits)).await
    }

    /// Saves one hit, optionally checking its version.
    pub async fn save(&self, hit: &Hit, expected_version: Option<Version>) -> Result<Version, StoreError> {
        self.run("save", || self.store.save(hit, expected_version)).await
    }

    /// Deletes every hit matching `query`.
    pub async fn delete_by_query(&self, query: &Query) -> Result<u64, StoreError> {
        self.run("delete_by_query", || self.store.delete_by_query(query))
            .await
    }

    /// Commits preceding writes.
    pub async fn commit(&self) -> Result<(), StoreError> {
        self.run("commit", || self.store.commit()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryHitStore;
    use serde_json::json;
    use tokio::time::Instant;

    fn coordinator(store: &MemoryHitStore, max_backoff_seconds: u64) -> BulkCoordinator {
        BulkCoordinator::new(
            Arc::new(store.clone()),
            &BulkConfig {
                max_backoff_seconds,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_with_capped_backoff() {
        let store = MemoryHitStore::new();
        store
            .fail_next(StoreError::Connection("refused".into()))
            .await;
        store
            .fail_next(StoreError::ConnectionTimeout("30s".into()))
            .await;
        store
            .fail_next(StoreError::Transport {
                status: 503,
                message: "unavailable".into(),
            })
            .await;
        store
            .fail_next(StoreError::Transport {
                status: 429,
                message: "slow down".into(),
            })
            .await;

        let bulk = coordinator(&store, 2);
        let started = Instant::now();
        bulk.bulk(&[Hit::new("Beaconing", None, json!({}))])
            .await
            .unwrap();

        // 1 + 2 + 2 + 2 seconds
        assert_eq!(started.elapsed(), Duration::from_secs(7));
        assert_eq!(store.reset_count(), 4);
        assert_eq!(store.count(&Query::All).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_errors_fail_immediately() {
        let store = MemoryHitStore::new();
        store
            .fail_next(StoreError::Transport {
                status: 400,
                message: "bad request".into(),
            })
            .await;

        let bulk = coordinator(&store, 10);
        let started = Instant::now();
        let err = bulk
            .update_by_query(&Query::All, &[UpdateOperation::set("score", 1)])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Transport { status: 400, .. }));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(store.reset_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_version_conflicts_are_not_retried() {
        let store = MemoryHitStore::new();
        let hit = Hit::new("Beaconing", None, json!({}));
        let bulk = coordinator(&store, 10);
        bulk.save(&hit, None).await.unwrap();

        let err = bulk.save(&hit, Some(7)).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
        assert_eq!(store.reset_count(), 0);
    }
}

//! Hit service: ingestion, single and bulk transitions, query-wide updates.
//!
//! Successful lifecycle changes fire automation triggers through an optional
//! [`AutomationHook`]. Services handed to automations are built without a
//! hook so automation-initiated changes never re-fire triggers.

use hw_observability::MetricsCollector;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::automation::AutomationHook;
use crate::bulk::BulkCoordinator;
use crate::config::EngineConfig;
use crate::error::InvalidDataError;
use crate::events::{emit_best_effort, Notifier, TriageEvent};
use crate::models::{Hit, Trigger, User};
use crate::query::Query;
use crate::report::{sanitize, Report, ReportEntry};
use crate::store::{AnalyticStore, HitStore, StoreError};
use crate::transitions::{TransitionContext, TransitionParams};
use crate::update::{apply_to_hit, with_log_entries, UpdateOperation};
use crate::workflow::{Workflow, WorkflowError};

/// Errors that can occur in hit service operations.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    InvalidData(#[from] InvalidDataError),

    #[error("Hit not found: {0}")]
    NotFound(String),
}

/// Ingests hits and runs workflow transitions against the hit store.
#[derive(Clone)]
pub struct HitService {
    hits: Arc<dyn HitStore>,
    analytics: Arc<dyn AnalyticStore>,
    bulk: BulkCoordinator,
    workflow: Arc<Workflow>,
    notifier: Arc<dyn Notifier>,
    automation: Option<Arc<dyn AutomationHook>>,
    config: EngineConfig,
    metrics: MetricsCollector,
}

impl HitService {
    /// Creates a service without an automation hook.
    pub fn new(
        hits: Arc<dyn HitStore>,
        analytics: Arc<dyn AnalyticStore>,
        workflow: Arc<Workflow>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            bulk: BulkCoordinator::new(hits.clone(), &config.bulk),
            hits,
            analytics,
            workflow,
            notifier,
            automation: None,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Fires lifecycle triggers through `hook`.
    pub fn with_automation(mut self, hook: Arc<dyn AutomationHook>) -> Self {
        self.automation = Some(hook);
        self
    }

    /// Returns a copy that never fires triggers.
    pub fn without_automation(&self) -> Self {
        Self {
            automation: None,
            ..self.clone()
        }
    }

    pub fn hits(&self) -> &Arc<dyn HitStore> {
        &self.hits
    }

    pub fn analytics(&self) -> &Arc<dyn AnalyticStore> {
        &self.analytics
    }

    pub fn bulk(&self) -> &BulkCoordinator {
        &self.bulk
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fires a trigger over `query`. A no-op without a hook or with
    /// automation disabled.
    pub async fn fire(&self, query: &Query, trigger: Trigger, user: &User) {
        if !self.config.automation.enabled {
            return;
        }
        if let Some(hook) = &self.automation {
            debug!(trigger = %trigger, query = %query, "Firing automation trigger");
            hook.on_trigger(query, trigger, user).await;
        }
    }

    /// Ingests hits.
    ///
    /// Missing hashes are computed, each distinct analytic is upserted by
    /// name, and the `create` trigger fires over the saved ids.
    #[instrument(skip(self, hits, user), fields(count = hits.len(), user = %user.username))]
    pub async fn create_hits(&self, mut hits: Vec<Hit>, user: &User) -> Result<Vec<Hit>, ServiceError> {
        if hits.is_empty() {
            return Ok(hits);
        }

        let mut analytics = BTreeSet::new();
        for hit in &mut hits {
            if hit.analytic.trim().is_empty() {
                return Err(InvalidDataError::new(format!("Hit {} has no analytic", hit.id)).into());
            }
            if hit.hash.is_empty() {
                hit.hash = hit.compute_hash();
            }
            hit.validate()?;
            analytics.insert(hit.analytic.clone());
        }

        for name in &analytics {
            self.analytics.upsert_by_name(name).await?;
        }

        self.bulk.bulk(&hits).await?;
        self.bulk.commit().await?;
        info!(count = hits.len(), "Hits created");

        emit_best_effort(
            self.notifier.as_ref(),
            TriageEvent::HitsCreated { count: hits.len() },
        )
        .await;

        let ids = Query::ids(hits.iter().map(|h| h.id.clone()));
        self.fire(&ids, Trigger::Create, user).await;
        Ok(hits)
    }

    /// Gets a hit by id.
    pub async fn get_hit(&self, id: &str) -> Result<Hit, ServiceError> {
        self.hits
            .get(id)
            .await?
            .map(|versioned| versioned.item)
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    /// Runs a transition on one hit against its current version.
    async fn apply_transition(
        &self,
        id: &str,
        name: &str,
        params: &TransitionParams,
        user: &User,
    ) -> Result<Hit, ServiceError> {
        let current = self
            .hits
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;

        let hit = &current.item;
        let ctx = TransitionContext::new(hit, user, params);
        let operations = self.workflow.transition(hit.status, name, &ctx)?;

        let updated = apply_to_hit(hit, &operations, user)?;
        updated.validate()?;
        self.bulk.save(&updated, Some(current.version)).await?;
        Ok(updated)
    }

    /// Runs a transition on one hit and fires its trigger.
    #[instrument(skip(self, params, user), fields(user = %user.username))]
    pub async fn transition_hit(
        &self,
        id: &str,
        name: &str,
        params: &TransitionParams,
        user: &User,
    ) -> Result<Hit, ServiceError> {
        let result = self.apply_transition(id, name, params, user).await;
        self.metrics.record_transition(name, result.is_ok());
        let updated = result?;

        if let Ok(trigger) = Trigger::from_str(name) {
            self.fire(&Query::ids([updated.id.clone()]), trigger, user)
                .await;
        }
        Ok(updated)
    }

    /// Runs a transition on every hit matching `query`, up to the row cap.
    ///
    /// One hit's failure does not stop the others; each outcome becomes a
    /// report entry. The transition's trigger fires over the hits that
    /// succeeded.
    #[instrument(skip(self, query, params, user), fields(query = %query, user = %user.username))]
    pub async fn transition_hits(
        &self,
        query: &Query,
        name: &str,
        params: &TransitionParams,
        user: &User,
    ) -> Result<Report, ServiceError> {
        let row_cap = self.config.transitions.row_cap;
        let interval = self.config.transitions.progress_interval.max(1);
        let found = self.hits.search(query, row_cap).await?;

        let mut report: Report = Vec::new();
        if found.items.is_empty() {
            report.push(ReportEntry::skipped(
                query.clone(),
                "No matching hits",
                format!("No hits matched the query for '{}'", name),
            ));
            return Ok(report);
        }

        let total = found.items.len();
        let mut succeeded = Vec::new();
        let mut failed = 0usize;
        for (index, hit) in found.items.iter().enumerate() {
            let scope = Query::ids([hit.id.clone()]);
            let span = hw_observability::hit_span!(hit.id, transition = %name);
            match self
                .apply_transition(&hit.id, name, params, user)
                .instrument(span)
                .await
            {
                Ok(_) => {
                    self.metrics.record_transition(name, true);
                    succeeded.push(hit.id.clone());
                    report.push(ReportEntry::success(
                        scope,
                        "Transition applied",
                        format!("Applied '{}'", name),
                    ));
                }
                Err(e) => {
                    self.metrics.record_transition(name, false);
                    failed += 1;
                    debug!(hit_id = %hit.id, error = %e, "Transition failed for hit");
                    report.push(ReportEntry::error(scope, "Transition failed", e.to_string()));
                }
            }

            if (index + 1) % interval == 0 && index + 1 < total {
                emit_best_effort(
                    self.notifier.as_ref(),
                    TriageEvent::Progress {
                        transition: name.to_string(),
                        processed: index + 1,
                        total,
                    },
                )
                .await;
            }
        }

        if found.total > total as u64 {
            warn!(
                total = found.total,
                row_cap, "Bulk transition truncated at row cap"
            );
            let processed = Query::ids(found.items.iter().map(|h| h.id.clone()));
            report.push(ReportEntry::skipped(
                query.clone().and(processed.not()),
                "Row cap reached",
                format!(
                    "Only the first {} of {} matching hits were processed",
                    total, found.total
                ),
            ));
        }

        info!(
            transition = %name,
            succeeded = succeeded.len(),
            failed,
            "Bulk transition complete"
        );
        emit_best_effort(
            self.notifier.as_ref(),
            TriageEvent::HitsTransitioned {
                transition: name.to_string(),
                succeeded: succeeded.len(),
                failed,
            },
        )
        .await;

        if !succeeded.is_empty() {
            if let Ok(trigger) = Trigger::from_str(name) {
                self.fire(&Query::ids(succeeded), trigger, user).await;
            }
        }
        Ok(sanitize(report))
    }

    /// Applies operations to every hit matching `query`, logging each
    /// non-silent operation on the hits.
    pub async fn update_hits(
        &self,
        query: &Query,
        operations: &[UpdateOperation],
        user: &User,
    ) -> Result<u64, ServiceError> {
        let updated = self
            .bulk
            .update_by_query(query, &with_log_entries(operations, user))
            .await?;
        debug!(query = %query, updated, "Updated hits by query");
        Ok(updated)
    }
}

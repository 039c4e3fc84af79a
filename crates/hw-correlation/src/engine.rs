//! Correlation engine.
//!
//! Schedules one job per analytic rule. Each run reloads the analytic,
//! evaluates its rule and folds every match into a bundle. A run that fails
//! takes the rule off the schedule until rules are registered again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hw_core::events::emit_best_effort;
use hw_core::{Analytic, HitService, RuleType, ServiceError, StoreError, TriageEvent, User};
use hw_observability::MetricsCollector;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::bundle::{upsert_bundle, BundleOutcome};
use crate::rules::{Rule, RuleError};
use crate::scheduler::{Job, JobFailure, JobScheduler, SchedulerError};

/// Crontab used for rules that do not name one: every five minutes.
pub const DEFAULT_RULE_CRONTAB: &str = "*/5 * * * *";

/// Errors that can occur while registering or running rules.
#[derive(Error, Debug)]
pub enum CorrelationError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Analytic not found: {0}")]
    AnalyticNotFound(String),

    #[error("Analytic '{0}' has no rule")]
    NoRule(String),

    #[error("Rule run aborted: {0}")]
    Aborted(String),
}

/// Job id of an analytic's rule.
pub fn rule_job_id(analytic_id: &str) -> String {
    format!("rule_{}", analytic_id)
}

fn compile(analytic: &Analytic) -> Result<Rule, CorrelationError> {
    let text = analytic
        .rule
        .as_deref()
        .filter(|_| analytic.has_rule())
        .ok_or_else(|| CorrelationError::NoRule(analytic.name.clone()))?;
    Ok(Rule::compile(
        analytic.rule_type.unwrap_or(RuleType::Lucene),
        text,
    )?)
}

/// Registers, schedules and runs correlation rules.
#[derive(Clone)]
pub struct CorrelationEngine {
    service: HitService,
    scheduler: JobScheduler,
    metrics: MetricsCollector,
}

impl CorrelationEngine {
    /// Creates an engine that bundles through `service` and schedules on
    /// `scheduler`. Bundle creation fires `create` through the service's
    /// automation hook, if it has one.
    pub fn new(service: HitService, scheduler: JobScheduler) -> Self {
        Self {
            service,
            scheduler,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Schedules every analytic carrying a rule, replacing jobs already
    /// scheduled for them. Rules that do not compile are logged and skipped.
    ///
    /// Returns the number of rules scheduled.
    pub async fn register_rules(&self) -> Result<usize, CorrelationError> {
        if !self.service.config().correlation.enabled {
            info!("Correlation disabled, not scheduling rules");
            return Ok(0);
        }

        let analytics = self.service.analytics().list_with_rules().await?;
        let mut scheduled = 0;
        for analytic in &analytics {
            match self.register_rule(analytic).await {
                Ok(()) => scheduled += 1,
                Err(e) => warn!(
                    analytic_id = %analytic.id,
                    analytic = %analytic.name,
                    error = %e,
                    "Rule not scheduled"
                ),
            }
        }
        info!(scheduled, total = analytics.len(), "Correlation rules registered");
        Ok(scheduled)
    }

    /// Schedules one analytic's rule. The rule is compiled first so a
    /// broken rule never reaches the schedule.
    pub async fn register_rule(&self, analytic: &Analytic) -> Result<(), CorrelationError> {
        compile(analytic)?;
        let crontab = analytic
            .rule_crontab
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_RULE_CRONTAB);

        let job = RuleJob {
            engine: self.clone(),
            analytic_id: analytic.id.clone(),
            name: analytic.name.clone(),
        };
        self.scheduler
            .add_job(rule_job_id(&analytic.id), crontab, Arc::new(job))
            .await?;
        Ok(())
    }

    /// Removes an analytic's rule from the schedule.
    pub async fn deregister_rule(&self, analytic_id: &str) -> bool {
        self.scheduler.remove_job(&rule_job_id(analytic_id)).await
    }

    /// Evaluates an analytic's rule at `now` and bundles every match.
    #[instrument(skip(self, analytic), fields(analytic = %analytic.name))]
    pub async fn execute_rule(
        &self,
        analytic: &Analytic,
        now: DateTime<Utc>,
    ) -> Result<Vec<BundleOutcome>, CorrelationError> {
        let result = self.evaluate_and_bundle(analytic, now).await;
        self.metrics.record_rule_run(result.is_ok());
        result
    }

    async fn evaluate_and_bundle(
        &self,
        analytic: &Analytic,
        now: DateTime<Utc>,
    ) -> Result<Vec<BundleOutcome>, CorrelationError> {
        let rule = compile(analytic)?;
        let matches = rule
            .evaluate(
                self.service.hits().as_ref(),
                now,
                self.service.config().correlation.max_matches,
            )
            .await?;
        debug!(matches = matches.len(), "Rule evaluated");

        let user = User::system();
        let mut outcomes = Vec::with_capacity(matches.len());
        for matched in &matches {
            let outcome = upsert_bundle(&self.service, analytic, matched, &user).await?;
            if outcome.created {
                self.metrics.record_bundle_created();
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Reloads the analytic and runs its rule now.
    async fn run_scheduled(&self, analytic_id: &str) -> Result<Vec<BundleOutcome>, CorrelationError> {
        let analytic = self
            .service
            .analytics()
            .get(analytic_id)
            .await?
            .ok_or_else(|| CorrelationError::AnalyticNotFound(analytic_id.to_string()))?;
        self.execute_rule(&analytic, Utc::now()).await
    }
}

struct RuleJob {
    engine: CorrelationEngine,
    analytic_id: String,
    name: String,
}

#[async_trait]
impl Job for RuleJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<(), JobFailure> {
        let span = hw_observability::rule_span!(self.analytic_id, self.name);
        let engine = self.engine.clone();
        let analytic_id = self.analytic_id.clone();
        let run = tokio::spawn(
            async move { engine.run_scheduled(&analytic_id).await }.instrument(span),
        );
        let result = match run.await {
            Ok(result) => result,
            Err(e) => Err(CorrelationError::Aborted(e.to_string())),
        };
        match result {
            Ok(outcomes) => {
                debug!(analytic = %self.name, bundles = outcomes.len(), "Rule run complete");
                Ok(())
            }
            Err(e) => {
                emit_best_effort(
                    self.engine.service.notifier().as_ref(),
                    TriageEvent::RuleDisabled {
                        analytic_id: self.analytic_id.clone(),
                        analytic: self.name.clone(),
                        error: e.to_string(),
                    },
                )
                .await;
                Err(Box::new(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hw_core::events::EventBus;
    use hw_core::store::{MemoryAnalyticStore, MemoryHitStore};
    use hw_core::{hit_workflow, AnalyticStore, EngineConfig};

    fn engine(analytics: Vec<Analytic>, config: EngineConfig) -> CorrelationEngine {
        let service = HitService::new(
            Arc::new(MemoryHitStore::new()),
            Arc::new(MemoryAnalyticStore::with_analytics(analytics)),
            Arc::new(hit_workflow().unwrap()),
            Arc::new(EventBus::default()),
            config,
        );
        CorrelationEngine::new(service, JobScheduler::new())
    }

    #[tokio::test]
    async fn test_register_rules_skips_broken_rules() {
        let good = Analytic::new("Beaconing").with_rule("analytic:Beaconing", RuleType::Lucene, "*/5 * * * *");
        let broken = Analytic::new("Broken").with_rule("sequence [a:b]", RuleType::Eql, "*/5 * * * *");
        let bad_cron = Analytic::new("Cron").with_rule("analytic:Cron", RuleType::Lucene, "whenever");
        let engine = engine(vec![good.clone(), broken, bad_cron], EngineConfig::default());

        assert_eq!(engine.register_rules().await.unwrap(), 1);
        assert_eq!(
            engine.scheduler().job_ids().await,
            vec![rule_job_id(&good.id)]
        );

        // Re-registering replaces rather than duplicates.
        assert_eq!(engine.register_rules().await.unwrap(), 1);
        assert_eq!(engine.scheduler().job_ids().await.len(), 1);

        assert!(engine.deregister_rule(&good.id).await);
        assert!(!engine.scheduler().has_job(&rule_job_id(&good.id)).await);
        engine.scheduler().shutdown().await;
    }

    #[tokio::test]
    async fn test_register_rules_disabled() {
        let good = Analytic::new("Beaconing").with_rule("analytic:Beaconing", RuleType::Lucene, "*/5 * * * *");
        let mut config = EngineConfig::default();
        config.correlation.enabled = false;
        let engine = engine(vec![good], config);

        assert_eq!(engine.register_rules().await.unwrap(), 0);
        assert!(engine.scheduler().job_ids().await.is_empty());
    }

    /// Lists rules normally but panics when a run reloads its analytic.
    struct PanickingAnalytics(MemoryAnalyticStore);

    #[async_trait]
    impl AnalyticStore for PanickingAnalytics {
        async fn list_with_rules(&self) -> Result<Vec<Analytic>, StoreError> {
            self.0.list_with_rules().await
        }

        async fn get(&self, _id: &str) -> Result<Option<Analytic>, StoreError> {
            panic!("analytic store corrupted");
        }

        async fn get_by_name(&self, name: &str) -> Result<Option<Analytic>, StoreError> {
            self.0.get_by_name(name).await
        }

        async fn upsert_by_name(&self, name: &str) -> Result<Analytic, StoreError> {
            self.0.upsert_by_name(name).await
        }

        async fn save(&self, analytic: &Analytic) -> Result<(), StoreError> {
            self.0.save(analytic).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_run_disables_rule() {
        let analytic = Analytic::new("Beaconing").with_rule("analytic:Beaconing", RuleType::Lucene, "* * * * * *");
        let bus = Arc::new(EventBus::default());
        let service = HitService::new(
            Arc::new(MemoryHitStore::new()),
            Arc::new(PanickingAnalytics(MemoryAnalyticStore::with_analytics(vec![analytic.clone()]))),
            Arc::new(hit_workflow().unwrap()),
            bus.clone(),
            EngineConfig::default(),
        );
        let engine = CorrelationEngine::new(service, JobScheduler::new());

        assert_eq!(engine.register_rules().await.unwrap(), 1);
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;

        assert!(!engine.scheduler().has_job(&rule_job_id(&analytic.id)).await);
        let history = bus.history().await;
        assert!(history.iter().any(|e| matches!(
            e,
            TriageEvent::RuleDisabled { analytic_id, error, .. }
                if *analytic_id == analytic.id && error.contains("aborted")
        )));
    }

    #[tokio::test]
    async fn test_execute_rule_without_rule_fails() {
        let engine = engine(vec![], EngineConfig::default());
        let err = engine
            .execute_rule(&Analytic::new("Empty"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CorrelationError::NoRule(name) if name == "Empty"));
    }
}

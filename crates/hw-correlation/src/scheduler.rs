//! Cron job scheduler.
//!
//! Each job runs on its own tokio task, one run at a time. A job whose run
//! returns an error or panics is taken off the schedule. Removing or replacing a job
//! stops future runs but lets an in-flight run finish.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Errors raised by the scheduler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Invalid crontab '{expression}': {message}")]
    InvalidCrontab { expression: String, message: String },

    #[error("Scheduler is shut down")]
    ShutDown,
}

/// Error type of a failed job run.
pub type JobFailure = Box<dyn std::error::Error + Send + Sync>;

/// A unit of scheduled work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), JobFailure>;
}

struct ScheduledJob {
    generation: u64,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    jobs: RwLock<HashMap<String, ScheduledJob>>,
    next_generation: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Handle to the job scheduler. Clones share the same jobs.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a crontab. Five-field expressions get a leading seconds field of 0.
pub fn parse_crontab(expression: &str) -> Result<Schedule, SchedulerError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCrontab {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

impl JobScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                shutdown_tx,
                shutdown_rx,
            }),
        }
    }

    /// Schedules `job` under `id`, replacing any job already scheduled there.
    pub async fn add_job(
        &self,
        id: impl Into<String>,
        crontab: &str,
        job: Arc<dyn Job>,
    ) -> Result<(), SchedulerError> {
        if *self.inner.shutdown_rx.borrow() {
            return Err(SchedulerError::ShutDown);
        }
        let id = id.into();
        let schedule = parse_crontab(crontab)?;
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let (cancel, cancel_rx) = watch::channel(false);

        let mut jobs = self.inner.jobs.write().await;
        let handle = tokio::spawn(run_job(
            Arc::downgrade(&self.inner),
            id.clone(),
            generation,
            schedule,
            job,
            cancel_rx,
            self.inner.shutdown_rx.clone(),
        ));
        let replaced = jobs.insert(
            id.clone(),
            ScheduledJob {
                generation,
                cancel,
                handle,
            },
        );
        if let Some(old) = replaced {
            let _ = old.cancel.send(true);
            debug!(job_id = %id, "Replaced scheduled job");
        }
        info!(job_id = %id, crontab = %crontab, "Job scheduled");
        Ok(())
    }

    /// Removes a job. Returns false if no job was scheduled under `id`.
    pub async fn remove_job(&self, id: &str) -> bool {
        match self.inner.jobs.write().await.remove(id) {
            Some(job) => {
                let _ = job.cancel.send(true);
                info!(job_id = %id, "Job removed");
                true
            }
            None => false,
        }
    }

    pub async fn has_job(&self, id: &str) -> bool {
        self.inner.jobs.read().await.contains_key(id)
    }

    /// Ids of all scheduled jobs, sorted.
    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.jobs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stops every job and waits for in-flight runs to finish. Later calls
    /// to [`add_job`](Self::add_job) fail.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let jobs: Vec<(String, ScheduledJob)> = self.inner.jobs.write().await.drain().collect();
        info!(jobs = jobs.len(), "Scheduler shutting down");
        for (id, job) in jobs {
            if let Err(e) = job.handle.await {
                warn!(job_id = %id, error = %e, "Job task ended abnormally");
            }
        }
    }
}

async fn run_job(
    inner: Weak<Inner>,
    id: String,
    generation: u64,
    schedule: Schedule,
    job: Arc<dyn Job>,
    mut cancel_rx: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // Wall-clock time advanced by the tokio clock.
    let started_at = Utc::now();
    let started = Instant::now();
    let now = || -> DateTime<Utc> {
        started_at
            + chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
    };

    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        let current = now();
        let after = last_fire.map_or(current, |last| last.max(current));
        let Some(next) = schedule.after(&after).next() else {
            debug!(job_id = %id, "Schedule has no further fire times");
            break;
        };
        let wait = (next - current).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel_rx.changed() => break,
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        last_fire = Some(next);
        debug!(job_id = %id, job = job.name(), "Running scheduled job");
        // A panicking run is a failed run.
        let runner = Arc::clone(&job);
        let result = match tokio::spawn(async move { runner.run().await }).await {
            Ok(result) => result,
            Err(e) => Err(JobFailure::from(e.to_string())),
        };
        match result {
            Ok(()) => debug!(job_id = %id, "Scheduled job finished"),
            Err(e) => {
                error!(
                    severity = "critical",
                    job_id = %id,
                    job = job.name(),
                    error = %e,
                    "Scheduled job failed; removed from the schedule"
                );
                if let Some(inner) = inner.upgrade() {
                    let mut jobs = inner.jobs.write().await;
                    if jobs.get(&id).is_some_and(|j| j.generation == generation) {
                        jobs.remove(&id);
                    }
                }
                break;
            }
        }
    }
}

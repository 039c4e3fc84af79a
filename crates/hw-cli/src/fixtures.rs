//! Seed data for the in-memory store.
//!
//! ```json
//! {
//!   "analytics": [{"name": "Beaconing", "rule": "analytic:Beaconing", "rule_type": "lucene", "rule_crontab": "*/5 * * * *"}],
//!   "actions": [{"id": "a1", "name": "label", "owner": "admin", "query": "*:*", "operations": [], "triggers": ["create"]}],
//!   "hits": [{"analytic": "Beaconing", "data": {"host": "web-1"}}]
//! }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hw_core::{ActionRecord, ActionStore, Analytic, Hit, HitService, RuleType, User};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub analytics: Vec<AnalyticFixture>,
    #[serde(default)]
    pub actions: Vec<ActionRecord>,
    #[serde(default)]
    pub hits: Vec<HitFixture>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyticFixture {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub rule: Option<String>,
    #[serde(default)]
    pub rule_type: Option<RuleType>,
    #[serde(default)]
    pub rule_crontab: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HitFixture {
    pub analytic: String,
    #[serde(default)]
    pub detection: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Counts of seeded records.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub analytics: usize,
    pub actions: usize,
    pub hits: usize,
}

impl Fixtures {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixtures: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse fixtures: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn analytics(&self) -> Vec<Analytic> {
        self.analytics
            .iter()
            .map(|fixture| Analytic {
                owner: fixture.owner.clone(),
                rule: fixture.rule.clone(),
                rule_type: fixture.rule_type,
                rule_crontab: fixture.rule_crontab.clone(),
                ..Analytic::new(fixture.name.clone())
            })
            .collect()
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.hits
            .iter()
            .map(|fixture| {
                let hit = Hit::new(
                    fixture.analytic.clone(),
                    fixture.detection.clone(),
                    fixture.data.clone(),
                );
                match fixture.timestamp {
                    Some(timestamp) => hit.with_timestamp(timestamp),
                    None => hit,
                }
            })
            .collect()
    }

    /// Saves analytics and actions, then ingests the hits so `create`
    /// automations run over them.
    pub async fn seed(&self, service: &HitService, actions: &dyn ActionStore) -> Result<SeedSummary> {
        let analytics = self.analytics();
        for analytic in &analytics {
            service.analytics().save(analytic).await?;
        }
        for action in &self.actions {
            actions.save(action).await?;
        }
        let hits = service.create_hits(self.hits(), &User::system()).await?;

        let summary = SeedSummary {
            analytics: analytics.len(),
            actions: self.actions.len(),
            hits: hits.len(),
        };
        info!(
            analytics = summary.analytics,
            actions = summary.actions,
            hits = summary.hits,
            "Fixtures loaded"
        );
        Ok(summary)
    }
}

//! In-memory store implementations.
//!
//! These hold documents in process and evaluate queries with
//! [`CompiledQuery`]. They back the CLI demo and serve as test doubles:
//! [`MemoryHitStore::fail_next`] queues errors returned by subsequent writes.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{
    ActionStore, AnalyticStore, HitStore, SearchResult, StoreError, Version, Versioned,
};
use crate::models::{ActionRecord, Analytic, Hit, Trigger};
use crate::query::{CompiledQuery, Query};
use crate::update::UpdateOperation;

#[derive(Debug, Clone)]
struct StoredDocument {
    document: Value,
    version: Version,
}

/// In-memory hit store.
#[derive(Clone, Default)]
pub struct MemoryHitStore {
    documents: Arc<RwLock<HashMap<String, StoredDocument>>>,
    failures: Arc<Mutex<VecDeque<StoreError>>>,
    resets: Arc<AtomicUsize>,
}

impl MemoryHitStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with hits.
    pub fn with_hits(hits: Vec<Hit>) -> Result<Self, StoreError> {
        let mut documents = HashMap::new();
        for hit in hits {
            documents.insert(
                hit.id.clone(),
                StoredDocument {
                    document: hit.to_document()?,
                    version: 1,
                },
            );
        }
        Ok(Self {
            documents: Arc::new(RwLock::new(documents)),
            ..Self::default()
        })
    }

    /// Queues an error for the next write call.
    pub async fn fail_next(&self, error: StoreError) {
        self.failures.lock().await.push_back(error);
    }

    /// Number of times the connection was reset.
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Gets a snapshot of all hits in the store.
    pub async fn snapshot(&self) -> Vec<Hit> {
        let documents = self.documents.read().await;
        documents
            .values()
            .filter_map(|stored| Hit::from_document(stored.document.clone()).ok())
            .collect()
    }

    async fn take_failure(&self) -> Result<(), StoreError> {
        match self.failures.lock().await.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl HitStore for MemoryHitStore {
    async fn search(&self, query: &Query, rows: usize) -> Result<SearchResult<Hit>, StoreError> {
        let compiled = CompiledQuery::compile(query)?;
        let documents = self.documents.read().await;

        let mut matched = Vec::new();
        for stored in documents.values() {
            if compiled.matches(&stored.document) {
                matched.push(Hit::from_document(stored.document.clone())?);
            }
        }
        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let total = matched.len() as u64;
        matched.truncate(rows);
        Ok(SearchResult {
            items: matched,
            total,
        })
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        let compiled = CompiledQuery::compile(query)?;
        let documents = self.documents.read().await;
        Ok(documents
            .values()
            .filter(|stored| compiled.matches(&stored.document))
            .count() as u64)
    }

    async fn get(&self, id: &str) -> Result<Option<Versioned<Hit>>, StoreError> {
        let documents = self.documents.read().await;
        match documents.get(id) {
            Some(stored) => Ok(Some(Versioned {
                item: Hit::from_document(stored.document.clone())?,
                version: stored.version,
            })),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        hit: &Hit,
        expected_version: Option<Version>,
    ) -> Result<Version, StoreError> {
        self.take_failure().await?;
        hit.validate()?;
        let document = hit.to_document()?;
        let mut documents = self.documents.write().await;

        let current = documents.get(&hit.id).map(|stored| stored.version).unwrap_or(0);
        if let Some(expected) = expected_version {
            if expected != current {
                return Err(StoreError::VersionConflict {
                    id: hit.id.clone(),
                    expected,
                    actual: current,
                });
            }
        }

        let version = current + 1;
        documents.insert(hit.id.clone(), StoredDocument { document, version });
        Ok(version)
    }

    async fn update_by_query(
        &self,
        query: &Query,
        operations: &[UpdateOperation],
    ) -> Result<u64, StoreError> {
        self.take_failure().await?;
        let compiled = CompiledQuery::compile(query)?;
        let mut documents = self.documents.write().await;

        // Apply to copies first so a failing operation leaves the store untouched
        let mut updated = Vec::new();
        for (id, stored) in documents.iter() {
            if !compiled.matches(&stored.document) {
                continue;
            }
            let mut document = stored.document.clone();
            for operation in operations {
                operation.apply(&mut document)?;
            }
            Hit::from_document(document.clone())?.validate()?;
            updated.push((id.clone(), document));
        }

        let count = updated.len() as u64;
        for (id, document) in updated {
            if let Some(stored) = documents.get_mut(&id) {
                stored.document = document;
                stored.version += 1;
            }
        }
        Ok(count)
    }

    async fn bulk(&self, hits: &[Hit]) -> Result<(), StoreError> {
        self.take_failure().await?;
        let mut prepared = Vec::with_capacity(hits.len());
        for hit in hits {
            hit.validate()?;
            prepared.push((hit.id.clone(), hit.to_document()?));
        }

        let mut documents = self.documents.write().await;
        for (id, document) in prepared {
            let version = documents.get(&id).map(|s| s.version).unwrap_or(0) + 1;
            documents.insert(id, StoredDocument { document, version });
        }
        Ok(())
    }

    async fn delete_by_query(&self, query: &Query) -> Result<u64, StoreError> {
        self.take_failure().await?;
        let compiled = CompiledQuery::compile(query)?;
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|_, stored| !compiled.matches(&stored.document));
        Ok((before - documents.len()) as u64)
    }

    async fn commit(&self) -> Result<(), StoreError> {
        self.take_failure().await
    }

    async fn reset_connection(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory action store.
#[derive(Clone, Default)]
pub struct MemoryActionStore {
    actions: Arc<RwLock<HashMap<String, ActionRecord>>>,
}

impl MemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with actions.
    pub fn with_actions(actions: Vec<ActionRecord>) -> Self {
        let map = actions.into_iter().map(|a| (a.id.clone(), a)).collect();
        Self {
            actions: Arc::new(RwLock::new(map)),
        }
    }
}

#[async_trait]
impl ActionStore for MemoryActionStore {
    async fn find_by_trigger(&self, trigger: Trigger) -> Result<Vec<ActionRecord>, StoreError> {
        let actions = self.actions.read().await;
        let mut matching: Vec<ActionRecord> = actions
            .values()
            .filter(|action| action.fires_on(trigger))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn list(&self) -> Result<Vec<ActionRecord>, StoreError> {
        let actions = self.actions.read().await;
        let mut all: Vec<ActionRecord> = actions.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn get(&self, id: &str) -> Result<Option<ActionRecord>, StoreError> {
        Ok(self.actions.read().await.get(id).cloned())
    }

    async fn save(&self, action: &ActionRecord) -> Result<(), StoreError> {
        action.validate()?;
        self.actions
            .write()
            .await
            .insert(action.id.clone(), action.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.actions.write().await.remove(id).is_some())
    }
}

/// In-memory analytic store.
#[derive(Clone, Default)]
pub struct MemoryAnalyticStore {
    analytics: Arc<RwLock<HashMap<String, Analytic>>>,
}

impl MemoryAnalyticStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with analytics.
    pub fn with_analytics(analytics: Vec<Analytic>) -> Self {
        let map = analytics.into_iter().map(|a| (a.id.clone(), a)).collect();
        Self {
            analytics: Arc::new(RwLock::new(map)),
        }
    }
}

#[async_trait]
impl AnalyticStore for MemoryAnalyticStore {
    async fn list_with_rules(&self) -> Result<Vec<Analytic>, StoreError> {
        let analytics = self.analytics.read().await;
        let mut with_rules: Vec<Analytic> = analytics
            .values()
            .filter(|a| a.has_rule())
            .cloned()
            .collect();
        with_rules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(with_rules)
    }

    async fn get(&self, id: &str) -> Result<Option<Analytic>, StoreError> {
        Ok(self.analytics.read().await.get(id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Analytic>, StoreError> {
        let analytics = self.analytics.read().await;
        Ok(analytics.values().find(|a| a.name == name).cloned())
    }

    async fn upsert_by_name(&self, name: &str) -> Result<Analytic, StoreError> {
        let mut analytics = self.analytics.write().await;
        if let Some(existing) = analytics.values().find(|a| a.name == name) {
            return Ok(existing.clone());
        }
        let analytic = Analytic::new(name);
        analytics.insert(analytic.id.clone(), analytic.clone());
        Ok(analytic)
    }

    async fn save(&self, analytic: &Analytic) -> Result<(), StoreError> {
        self.analytics
            .write()
            .await
            .insert(analytic.id.clone(), analytic.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Escalation, HitStatus, RuleType};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn hits() -> Vec<Hit> {
        let now = Utc::now();
        vec![
            Hit::new("Beaconing", None, json!({"host": "web-1"}))
                .with_timestamp(now - Duration::minutes(2)),
            Hit::new("Beaconing", None, json!({"host": "web-2"}))
                .with_timestamp(now - Duration::minutes(1)),
            Hit::new("Phishing", None, json!({"host": "mail-1"}))
                .with_timestamp(now)
                .with_status(HitStatus::Resolved),
        ]
    }

    #[tokio::test]
    async fn test_search_orders_by_timestamp_and_caps_rows() {
        let store = MemoryHitStore::with_hits(hits()).unwrap();
        let result = store
            .search(&Query::term("analytic", "Beaconing"), 1)
            .await
            .unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].data["host"], "web-1");
        assert_eq!(store.count(&Query::All).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_save_checks_version() {
        let store = MemoryHitStore::new();
        let hit = Hit::new("Beaconing", None, json!({}));
        let v1 = store.save(&hit, None).await.unwrap();
        assert_eq!(v1, 1);
        let v2 = store.save(&hit, Some(1)).await.unwrap();
        assert_eq!(v2, 2);

        let err = store.save(&hit, Some(1)).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::VersionConflict {
                id: hit.id.clone(),
                expected: 1,
                actual: 2
            }
        );
    }

    #[tokio::test]
    async fn test_update_by_query_is_all_or_nothing() {
        let store = MemoryHitStore::with_hits(hits()).unwrap();
        let count = store
            .update_by_query(
                &Query::term("analytic", "Beaconing"),
                &[UpdateOperation::append_if_missing("labels.threat", "c2")],
            )
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            store
                .count(&Query::term("labels.threat", "c2"))
                .await
                .unwrap(),
            2
        );

        let result = store
            .update_by_query(&Query::All, &[UpdateOperation::increment("status", 1)])
            .await;
        assert!(matches!(result, Err(StoreError::InvalidData(_))));
        assert_eq!(
            store
                .count(&Query::term("status", "open"))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_writes_reject_escalation_without_assessment() {
        let store = MemoryHitStore::with_hits(hits()).unwrap();
        let result = store
            .update_by_query(
                &Query::term("analytic", "Beaconing"),
                &[UpdateOperation::set("escalation", "evidence")],
            )
            .await;
        assert!(matches!(result, Err(StoreError::InvalidData(_))));
        assert_eq!(store.count(&Query::term("escalation", "evidence")).await.unwrap(), 0);

        let count = store
            .update_by_query(
                &Query::term("analytic", "Beaconing"),
                &[
                    UpdateOperation::set("escalation", "evidence"),
                    UpdateOperation::set("assessment", "compromise"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(count, 2);

        let mut miss = Hit::new("Beaconing", None, json!({}));
        miss.escalation = Escalation::Miss;
        assert!(matches!(
            store.save(&miss, None).await,
            Err(StoreError::InvalidData(_))
        ));
        assert!(matches!(
            store.bulk(&[miss]).await,
            Err(StoreError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failures_hit_writes_only() {
        let store = MemoryHitStore::new();
        store
            .fail_next(StoreError::Connection("refused".into()))
            .await;
        assert_eq!(store.count(&Query::All).await.unwrap(), 0);
        assert!(store.bulk(&hits()).await.is_err());
        assert!(store.bulk(&hits()).await.is_ok());
        assert_eq!(store.count(&Query::All).await.unwrap(), 3);

        store.reset_connection().await;
        assert_eq!(store.reset_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_query() {
        let store = MemoryHitStore::with_hits(hits()).unwrap();
        let removed = store
            .delete_by_query(&Query::term("status", "resolved"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_analytic_upsert_by_name() {
        let store = MemoryAnalyticStore::new();
        let first = store.upsert_by_name("Beaconing").await.unwrap();
        let second = store.upsert_by_name("Beaconing").await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(store.list_with_rules().await.unwrap().is_empty());

        let with_rule = first.with_rule("analytic:Beaconing", RuleType::Lucene, "*/5 * * * *");
        store.save(&with_rule).await.unwrap();
        assert_eq!(store.list_with_rules().await.unwrap().len(), 1);
        assert!(store.get_by_name("Beaconing").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_actions_by_trigger() {
        let store = MemoryActionStore::new();
        let action = ActionRecord {
            id: "a1".into(),
            name: "Label".into(),
            owner: "admin".into(),
            query: "analytic:Beaconing".into(),
            operations: vec![],
            triggers: vec![Trigger::Create],
        };
        store.save(&action).await.unwrap();
        assert_eq!(store.find_by_trigger(Trigger::Create).await.unwrap().len(), 1);
        assert!(store.find_by_trigger(Trigger::Promote).await.unwrap().is_empty());
        assert!(store.delete("a1").await.unwrap());
        assert!(!store.delete("a1").await.unwrap());
    }
}

//! Content-addressed bundles.
//!
//! A bundle's hash covers the analytic, the resolved rule query and the
//! sorted hashes of its children, so re-running a rule over an unchanged
//! match set finds the existing bundle instead of creating another.

use hw_core::events::emit_best_effort;
use hw_core::{
    Analytic, Hit, HitService, Query, ServiceError, TriageEvent, Trigger, UpdateOperation, User,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::rules::RuleMatch;

/// Computes a bundle hash.
pub fn bundle_hash(analytic_id: &str, query: &str, child_hashes: &[String]) -> String {
    let mut sorted: Vec<&str> = child_hashes.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(analytic_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(query.as_bytes());
    for hash in sorted {
        hasher.update(b"\x1f");
        hasher.update(hash.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// The bundle a rule match was folded into.
#[derive(Debug, Clone)]
pub struct BundleOutcome {
    pub bundle: Hit,
    pub created: bool,
}

/// Finds or creates the bundle for `matched`, then links every matched hit
/// to it. Linking is a set union on both sides.
///
/// The lookup and the creation are separate store calls; two concurrent
/// runs over the same match can both create a bundle.
pub(crate) async fn upsert_bundle(
    service: &HitService,
    analytic: &Analytic,
    matched: &RuleMatch,
    user: &User,
) -> Result<BundleOutcome, ServiceError> {
    let child_hashes: Vec<String> = matched.hits.iter().map(|h| h.hash.clone()).collect();
    let hash = bundle_hash(&analytic.id, &matched.query, &child_hashes);
    let child_ids: Vec<String> = matched.hits.iter().map(|h| h.id.clone()).collect();

    let existing = service
        .hits()
        .search(
            &Query::term("is_bundle", "true").and(Query::term("hash", hash.clone())),
            1,
        )
        .await?
        .items
        .into_iter()
        .next();

    let (bundle, created) = match existing {
        Some(found) => {
            let current = service
                .hits()
                .get(&found.id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(found.id.clone()))?;
            let mut bundle = current.item;
            let before = bundle.hits.len();
            for id in &child_ids {
                if !bundle.hits.contains(id) {
                    bundle.hits.push(id.clone());
                }
            }
            if bundle.hits.len() != before {
                bundle.bundle_size = bundle.hits.len();
                bundle.validate()?;
                service.bulk().save(&bundle, Some(current.version)).await?;
            }
            debug!(bundle_id = %bundle.id, size = bundle.bundle_size, "Reusing bundle");
            (bundle, false)
        }
        None => {
            let mut bundle = Hit::new(
                analytic.name.clone(),
                None,
                json!({ "query": matched.query }),
            );
            bundle.is_bundle = true;
            bundle.hash = hash;
            bundle.hits = child_ids.clone();
            bundle.bundle_size = bundle.hits.len();
            if let Some(latest) = matched.hits.iter().map(|h| h.timestamp).max() {
                bundle.timestamp = latest;
            }
            bundle.validate()?;
            service.bulk().save(&bundle, None).await?;
            (bundle, true)
        }
    };

    service
        .update_hits(
            &Query::ids(child_ids),
            &[UpdateOperation::append_if_missing("bundles", bundle.id.clone())],
            user,
        )
        .await?;
    service.bulk().commit().await?;

    if created {
        info!(
            bundle_id = %bundle.id,
            analytic = %analytic.name,
            size = bundle.bundle_size,
            "Bundle created"
        );
        service
            .fire(&Query::ids([bundle.id.clone()]), Trigger::Create, user)
            .await;
    }
    emit_best_effort(
        service.notifier().as_ref(),
        TriageEvent::BundleUpdated {
            bundle_id: bundle.id.clone(),
            analytic: analytic.name.clone(),
            size: bundle.bundle_size,
            created,
        },
    )
    .await;

    Ok(BundleOutcome { bundle, created })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hw_core::events::EventBus;
    use hw_core::store::{MemoryAnalyticStore, MemoryHitStore};
    use hw_core::{hit_workflow, EngineConfig, HitStore};
    use std::sync::Arc;

    fn service(store: &MemoryHitStore) -> HitService {
        HitService::new(
            Arc::new(store.clone()),
            Arc::new(MemoryAnalyticStore::new()),
            Arc::new(hit_workflow().unwrap()),
            Arc::new(EventBus::default()),
            EngineConfig::default(),
        )
    }

    #[test]
    fn test_hash_ignores_child_order() {
        let a = bundle_hash("an-1", "q", &["h1".into(), "h2".into()]);
        let b = bundle_hash("an-1", "q", &["h2".into(), "h1".into()]);
        assert_eq!(a, b);
        assert_ne!(a, bundle_hash("an-2", "q", &["h1".into(), "h2".into()]));
        assert_ne!(a, bundle_hash("an-1", "q2", &["h1".into(), "h2".into()]));
        assert_ne!(a, bundle_hash("an-1", "q", &["h1".into(), "h3".into()]));
    }

    #[tokio::test]
    async fn test_upsert_creates_then_reuses() {
        let hits = vec![
            Hit::new("Beaconing", None, json!({"host": "web-1"})),
            Hit::new("Beaconing", None, json!({"host": "web-2"})),
        ];
        let store = MemoryHitStore::with_hits(hits.clone()).unwrap();
        let service = service(&store);
        let analytic = Analytic::new("Beaconing");
        let matched = RuleMatch {
            query: "analytic:Beaconing".into(),
            hits: hits.clone(),
        };

        let first = upsert_bundle(&service, &analytic, &matched, &User::system())
            .await
            .unwrap();
        let second = upsert_bundle(&service, &analytic, &matched, &User::system())
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.bundle.id, second.bundle.id);
        assert_eq!(first.bundle.bundle_size, 2);
        assert_eq!(store.count(&Query::term("is_bundle", "true")).await.unwrap(), 1);

        for hit in &hits {
            let stored = store.get(&hit.id).await.unwrap().unwrap().item;
            assert_eq!(stored.bundles, vec![first.bundle.id.clone()]);
        }
    }
}

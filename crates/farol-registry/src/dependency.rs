//! Consumer -> provider dependency tracking
//!
//! Every successful discovery query records the edge between the consumer
//! and the provider key it resolved. Edges are upserted into the store and
//! mirrored in memory; the in-memory view answers the event bus's "does
//! this consumer care about this provider" question.
//!
//! Recording is best-effort: a store failure is logged and never fails the
//! query that triggered it.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use farol_store::{keys, KvStore, StoreResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRecord {
    pub consumer_id: String,
    pub provider_app: String,
    pub provider_name: String,
    pub version_rule: String,
}

#[derive(Clone)]
pub struct DependencyTracker {
    store: Arc<dyn KvStore>,
    /// consumer service id -> set of (provider app, provider name)
    edges: Arc<DashMap<String, HashSet<(String, String)>>>,
}

impl DependencyTracker {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        DependencyTracker {
            store,
            edges: Arc::new(DashMap::new()),
        }
    }

    /// Loads previously recorded edges from the store.
    pub async fn bootstrap(&self) -> StoreResult<()> {
        let resp = self.store.range(&keys::all_dependencies_prefix()).await?;
        for kv in resp.kvs {
            if let Ok(record) = serde_json::from_slice::<DependencyRecord>(&kv.value) {
                self.edges
                    .entry(record.consumer_id)
                    .or_default()
                    .insert((record.provider_app, record.provider_name));
            }
        }
        debug!(consumers = self.edges.len(), "dependency edges loaded");
        Ok(())
    }

    /// Upserts one edge. Idempotent; already-known edges skip the store
    /// write entirely.
    pub async fn record(
        &self,
        domain: &str,
        project: &str,
        consumer_id: &str,
        provider_app: &str,
        provider_name: &str,
        version_rule: &str,
    ) {
        let edge = (provider_app.to_string(), provider_name.to_string());
        let inserted = self
            .edges
            .entry(consumer_id.to_string())
            .or_default()
            .insert(edge);
        if !inserted {
            return;
        }

        let record = DependencyRecord {
            consumer_id: consumer_id.to_string(),
            provider_app: provider_app.to_string(),
            provider_name: provider_name.to_string(),
            version_rule: version_rule.to_string(),
        };
        let key = keys::dependency_key(domain, project, consumer_id, provider_app, provider_name);
        let value = match serde_json::to_vec(&record) {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, "failed to encode dependency record");
                return;
            }
        };
        if let Err(err) = self.store.put(&key, value).await {
            // Best-effort: the edge stays in memory and the write is
            // retried the next time the consumer re-resolves after a
            // restart drops the in-memory copy.
            warn!(%err, consumer = consumer_id, "failed to persist dependency edge");
        }
    }

    pub fn depends_on(&self, consumer_id: &str, provider_app: &str, provider_name: &str) -> bool {
        self.edges
            .get(consumer_id)
            .map(|set| set.contains(&(provider_app.to_string(), provider_name.to_string())))
            .unwrap_or(false)
    }

    /// Drops everything recorded for a consumer, both in memory and in the
    /// store. Called when the consumer service is unregistered.
    pub async fn forget_consumer(&self, domain: &str, project: &str, consumer_id: &str) {
        self.edges.remove(consumer_id);
        let prefix = format!("{}/dep/{}/{}/{}/", keys::ROOT, domain, project, consumer_id);
        if let Err(err) = self
            .store
            .txn(
                vec![],
                vec![farol_store::TxnOp::delete_prefix(prefix)],
                vec![],
            )
            .await
        {
            warn!(%err, consumer = consumer_id, "failed to delete dependency edges");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farol_store::MemoryStore;

    fn tracker() -> (Arc<MemoryStore>, DependencyTracker) {
        let store = Arc::new(MemoryStore::new());
        let tracker = DependencyTracker::new(store.clone() as Arc<dyn KvStore>);
        (store, tracker)
    }

    #[tokio::test]
    async fn test_record_and_lookup() {
        let (_, tracker) = tracker();
        tracker
            .record("default", "default", "c1", "app", "svc", "latest")
            .await;
        assert!(tracker.depends_on("c1", "app", "svc"));
        assert!(!tracker.depends_on("c1", "app", "other"));
        assert!(!tracker.depends_on("c2", "app", "svc"));
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let (store, tracker) = tracker();
        tracker
            .record("default", "default", "c1", "app", "svc", "latest")
            .await;
        let rev = store.highest_rev().await;
        tracker
            .record("default", "default", "c1", "app", "svc", "latest")
            .await;
        // The second record is a no-op; no store write happened.
        assert_eq!(store.highest_rev().await, rev);
    }

    #[tokio::test]
    async fn test_bootstrap_restores_edges() {
        let (store, tracker) = tracker();
        tracker
            .record("default", "default", "c1", "app", "svc", "1.0.0+")
            .await;

        let restored = DependencyTracker::new(store as Arc<dyn KvStore>);
        restored.bootstrap().await.unwrap();
        assert!(restored.depends_on("c1", "app", "svc"));
    }

    #[tokio::test]
    async fn test_forget_consumer() {
        let (store, tracker) = tracker();
        tracker
            .record("default", "default", "c1", "app", "svc", "latest")
            .await;
        tracker.forget_consumer("default", "default", "c1").await;
        assert!(!tracker.depends_on("c1", "app", "svc"));
        let resp = store.range("sr/dep/").await.unwrap();
        assert!(resp.kvs.is_empty());
    }
}

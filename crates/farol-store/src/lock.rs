//! Advisory cluster lock
//!
//! A lock is a key under `sr/lock/` created with a create-if-absent
//! transaction. The value records the holder and a wall-clock deadline;
//! a holder that outlives its deadline can be displaced by the next
//! contender. Release deletes the key only while the acquisition revision
//! still matches, so a displaced holder cannot release its successor.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::keys;
use crate::kv::{Compare, KvStore, StoreResult, TxnOp};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LockRecord {
    holder: String,
    /// Unix millis after which the lock is considered abandoned.
    deadline_ms: i64,
}

pub struct DistLock {
    store: Arc<dyn KvStore>,
    key: String,
    holder: String,
    ttl: Duration,
    /// Revision of our successful acquisition, if any.
    acquired_rev: Option<i64>,
}

impl DistLock {
    pub fn new(store: Arc<dyn KvStore>, name: &str, holder: &str, ttl: Duration) -> Self {
        DistLock {
            store,
            key: keys::lock_key(name),
            holder: holder.to_string(),
            ttl,
            acquired_rev: None,
        }
    }

    fn record(&self) -> Vec<u8> {
        let record = LockRecord {
            holder: self.holder.clone(),
            deadline_ms: chrono::Utc::now().timestamp_millis() + self.ttl.as_millis() as i64,
        };
        serde_json::to_vec(&record).unwrap_or_default()
    }

    /// Attempts to take the lock without blocking. Returns whether the
    /// caller now holds it.
    pub async fn try_acquire(&mut self) -> StoreResult<bool> {
        let current = self.store.get(&self.key).await?;
        let resp = match current {
            None => {
                self.store
                    .txn(
                        vec![Compare::absent(&self.key)],
                        vec![TxnOp::put(&self.key, self.record())],
                        vec![],
                    )
                    .await?
            }
            Some(kv) => {
                let stale = serde_json::from_slice::<LockRecord>(&kv.value)
                    .map(|r| r.deadline_ms < chrono::Utc::now().timestamp_millis())
                    .unwrap_or(true);
                if !stale {
                    return Ok(false);
                }
                // Steal an abandoned lock, guarded against concurrent
                // stealers by the observed revision.
                self.store
                    .txn(
                        vec![Compare::mod_rev_eq(&self.key, kv.mod_rev)],
                        vec![TxnOp::put(&self.key, self.record())],
                        vec![],
                    )
                    .await?
            }
        };
        if resp.succeeded {
            debug!(key = %self.key, holder = %self.holder, "lock acquired");
            self.acquired_rev = Some(resp.rev);
        }
        Ok(resp.succeeded)
    }

    /// Releases the lock if this instance still holds it.
    pub async fn release(&mut self) -> StoreResult<()> {
        if let Some(rev) = self.acquired_rev.take() {
            self.store
                .txn(
                    vec![Compare::mod_rev_eq(&self.key, rev)],
                    vec![TxnOp::delete(&self.key)],
                    vec![],
                )
                .await?;
            debug!(key = %self.key, holder = %self.holder, "lock released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn lock(store: &Arc<MemoryStore>, holder: &str, ttl: Duration) -> DistLock {
        DistLock::new(store.clone() as Arc<dyn KvStore>, "janitor", holder, ttl)
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let store = Arc::new(MemoryStore::new());
        let mut a = lock(&store, "node-a", Duration::from_secs(60));
        let mut b = lock(&store, "node-b", Duration::from_secs(60));

        assert!(a.try_acquire().await.unwrap());
        assert!(!b.try_acquire().await.unwrap());

        a.release().await.unwrap();
        assert!(b.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_lock_is_stealable() {
        let store = Arc::new(MemoryStore::new());
        let mut a = lock(&store, "node-a", Duration::from_millis(0));
        let mut b = lock(&store, "node-b", Duration::from_secs(60));

        assert!(a.try_acquire().await.unwrap());
        // node-a's deadline has already passed.
        assert!(b.try_acquire().await.unwrap());

        // The displaced holder can no longer release the lock.
        a.release().await.unwrap();
        assert!(store
            .get(&keys::lock_key("janitor"))
            .await
            .unwrap()
            .is_some());
    }
}

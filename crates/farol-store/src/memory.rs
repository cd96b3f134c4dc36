//! In-memory store backend
//!
//! A single revision counter stamps every mutation. All events are kept in
//! an ordered log so watchers can resume from any retained revision; the
//! log may be compacted, after which older resume points are rejected and
//! the watcher must re-range.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::kv::{
    Compare, CompareResult, CompareTarget, EventType, KeyValue, KvStore, RangeResponse,
    StoreError, StoreResult, TxnOp, TxnResponse, WatchEvent, Watcher,
};

const WATCH_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct Inner {
    kvs: BTreeMap<String, KeyValue>,
    /// Change log in strictly increasing revision order.
    log: Vec<WatchEvent>,
    rev: i64,
    /// Highest revision discarded from the log.
    compacted_rev: i64,
}

impl Inner {
    fn apply_put(&mut self, key: &str, value: Vec<u8>) -> i64 {
        self.rev += 1;
        let rev = self.rev;
        let entry = self.kvs.entry(key.to_string()).or_insert_with(|| KeyValue {
            key: key.to_string(),
            create_rev: rev,
            ..Default::default()
        });
        entry.value = value.clone();
        entry.mod_rev = rev;
        entry.version += 1;
        self.log.push(WatchEvent {
            event_type: EventType::Put,
            key: key.to_string(),
            value,
            rev,
        });
        rev
    }

    fn apply_delete(&mut self, key: &str) -> bool {
        match self.kvs.remove(key) {
            Some(old) => {
                self.rev += 1;
                self.log.push(WatchEvent {
                    event_type: EventType::Delete,
                    key: key.to_string(),
                    value: old.value,
                    rev: self.rev,
                });
                true
            }
            None => false,
        }
    }

    fn apply_op(&mut self, op: TxnOp) {
        match op {
            TxnOp::Put { key, value } => {
                self.apply_put(&key, value);
            }
            TxnOp::Delete { key } => {
                self.apply_delete(&key);
            }
            TxnOp::DeletePrefix { prefix } => {
                let keys: Vec<String> = self.keys_with_prefix(&prefix);
                for key in keys {
                    self.apply_delete(&key);
                }
            }
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.kvs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn eval_compare(&self, cmp: &Compare) -> bool {
        let (lhs, rhs) = match cmp.target {
            CompareTarget::PrefixCount(expected) => {
                let count = self
                    .kvs
                    .range(cmp.key.clone()..)
                    .take_while(|(k, _)| k.starts_with(&cmp.key))
                    .count() as i64;
                (count, expected)
            }
            CompareTarget::ModRev(expected) => (
                self.kvs.get(&cmp.key).map(|kv| kv.mod_rev).unwrap_or(0),
                expected,
            ),
            CompareTarget::CreateRev(expected) => (
                self.kvs.get(&cmp.key).map(|kv| kv.create_rev).unwrap_or(0),
                expected,
            ),
            CompareTarget::Version(expected) => (
                self.kvs.get(&cmp.key).map(|kv| kv.version).unwrap_or(0),
                expected,
            ),
        };
        match cmp.result {
            CompareResult::Equal => lhs == rhs,
            CompareResult::Greater => lhs > rhs,
            CompareResult::Less => lhs < rhs,
            CompareResult::NotEqual => lhs != rhs,
        }
    }
}

/// In-memory `KvStore` backend.
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Arc::new(Mutex::new(Inner::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Discards log entries with revision <= `up_to_rev`. Watchers behind
    /// the compaction point have their stream ended and must re-range.
    pub fn compact(&self, up_to_rev: i64) {
        let mut g = self.inner.lock().unwrap();
        g.log.retain(|e| e.rev > up_to_rev);
        if up_to_rev > g.compacted_rev {
            g.compacted_rev = up_to_rev;
        }
        drop(g);
        self.notify.notify_waiters();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<KeyValue>> {
        let g = self.inner.lock().unwrap();
        Ok(g.kvs.get(key).cloned())
    }

    async fn range(&self, prefix: &str) -> StoreResult<RangeResponse> {
        let g = self.inner.lock().unwrap();
        let kvs = g
            .kvs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect();
        Ok(RangeResponse { kvs, rev: g.rev })
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<i64> {
        let rev = {
            let mut g = self.inner.lock().unwrap();
            g.apply_put(key, value)
        };
        self.notify.notify_waiters();
        Ok(rev)
    }

    async fn delete(&self, key: &str) -> StoreResult<(bool, i64)> {
        let (existed, rev) = {
            let mut g = self.inner.lock().unwrap();
            let existed = g.apply_delete(key);
            (existed, g.rev)
        };
        if existed {
            self.notify.notify_waiters();
        }
        Ok((existed, rev))
    }

    async fn txn(
        &self,
        compares: Vec<Compare>,
        success: Vec<TxnOp>,
        failure: Vec<TxnOp>,
    ) -> StoreResult<TxnResponse> {
        let (succeeded, rev, mutated) = {
            let mut g = self.inner.lock().unwrap();
            let succeeded = compares.iter().all(|c| g.eval_compare(c));
            let ops = if succeeded { success } else { failure };
            let mutated = !ops.is_empty();
            for op in ops {
                g.apply_op(op);
            }
            (succeeded, g.rev, mutated)
        };
        if mutated {
            self.notify.notify_waiters();
        }
        Ok(TxnResponse { succeeded, rev })
    }

    async fn watch(&self, prefix: &str, from_rev: i64) -> StoreResult<Watcher> {
        {
            let g = self.inner.lock().unwrap();
            if from_rev < g.compacted_rev {
                return Err(StoreError::Compacted(from_rev));
            }
        }
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let inner = self.inner.clone();
        let notify = self.notify.clone();
        let prefix = prefix.to_string();
        tokio::spawn(async move {
            let mut cursor = from_rev;
            loop {
                let notified = notify.notified();
                let (batch, next_cursor) = {
                    let g = inner.lock().unwrap();
                    if cursor < g.compacted_rev {
                        // Fell behind compaction; end the stream so the
                        // opener re-ranges.
                        return;
                    }
                    let start = g.log.partition_point(|e| e.rev <= cursor);
                    let batch: Vec<WatchEvent> = g.log[start..]
                        .iter()
                        .filter(|e| e.key.starts_with(&prefix))
                        .cloned()
                        .collect();
                    (batch, g.rev)
                };
                cursor = next_cursor;
                if batch.is_empty() {
                    tokio::select! {
                        _ = notified => {}
                        _ = tx.closed() => return,
                    }
                } else {
                    for ev in batch {
                        if tx.send(ev).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(Watcher::new(rx))
    }

    async fn highest_rev(&self) -> i64 {
        self.inner.lock().unwrap().rev
    }
}

//! Per-instance lease management
//!
//! Heartbeats extend a lease's deadline; a single dispatcher task sleeps
//! until the earliest deadline in a min-heap and fires expiries. Heap
//! entries are never updated in place: a renewal pushes a fresh entry and
//! the dispatcher skips entries whose recorded deadline has moved on.
//!
//! An expiry deletes the instance through a transaction guarded by the
//! lease key's modification revision, so a renewal that lands after the
//! deadline but before the delete commits wins and the instance is not
//! resurrected. Each lease fires at most once.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use farol_common::error::RegistryError;
use farol_store::{keys, Compare, KvStore, StoreResult, TxnOp};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Instances deleted by lease expiry. The cache indexer consumes entries
/// to tag the resulting delete event as EXPIRE.
pub type ExpiryLedger = DashMap<(String, String), ()>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseState {
    Active,
    Expired,
    Cancelled,
}

#[derive(Clone, Debug)]
struct LeaseRecord {
    domain: String,
    project: String,
    ttl: Duration,
    deadline: Instant,
    /// Modification revision of the lease key at the last touch.
    lease_rev: i64,
    state: LeaseState,
}

/// Lease TTL policy. The effective TTL resolves request-supplied ->
/// service default -> global default -> 30 s, clamped to
/// `[min_ttl, max_ttl]`.
#[derive(Clone, Debug)]
pub struct LeaseOptions {
    /// Global default; zero means unset.
    pub default_ttl: Duration,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
}

impl Default for LeaseOptions {
    fn default() -> Self {
        Self {
            default_ttl: Duration::ZERO,
            min_ttl: Duration::from_secs(30),
            max_ttl: Duration::from_secs(3600),
        }
    }
}

const FALLBACK_TTL: Duration = Duration::from_secs(30);
const EXPIRE_RETRY_DELAY: Duration = Duration::from_secs(5);

type HeapEntry = (Instant, u64, String, String);

#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn KvStore>,
    leases: Arc<DashMap<(String, String), LeaseRecord>>,
    heap: Arc<Mutex<BinaryHeap<Reverse<HeapEntry>>>>,
    seq: Arc<AtomicU64>,
    ledger: Arc<ExpiryLedger>,
    opts: LeaseOptions,
    running: Arc<AtomicBool>,
    timer_kick: Arc<Notify>,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn KvStore>, ledger: Arc<ExpiryLedger>, opts: LeaseOptions) -> Self {
        LeaseManager {
            store,
            leases: Arc::new(DashMap::new()),
            heap: Arc::new(Mutex::new(BinaryHeap::new())),
            seq: Arc::new(AtomicU64::new(0)),
            ledger,
            opts,
            running: Arc::new(AtomicBool::new(false)),
            timer_kick: Arc::new(Notify::new()),
        }
    }

    /// Resolves the effective TTL for a new lease.
    pub fn resolve_ttl(&self, requested_secs: Option<i64>, service_default_secs: Option<i64>) -> Duration {
        let secs = requested_secs
            .filter(|s| *s > 0)
            .or_else(|| service_default_secs.filter(|s| *s > 0))
            .map(|s| Duration::from_secs(s as u64))
            .or_else(|| {
                if self.opts.default_ttl > Duration::ZERO {
                    Some(self.opts.default_ttl)
                } else {
                    None
                }
            })
            .unwrap_or(FALLBACK_TTL);
        secs.clamp(self.opts.min_ttl, self.opts.max_ttl)
    }

    fn push_entry(&self, deadline: Instant, service_id: &str, instance_id: &str) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().unwrap().push(Reverse((
            deadline,
            seq,
            service_id.to_string(),
            instance_id.to_string(),
        )));
        self.timer_kick.notify_waiters();
    }

    /// Grants (or re-grants) a lease and writes the lease key.
    pub async fn grant(
        &self,
        domain: &str,
        project: &str,
        service_id: &str,
        instance_id: &str,
        ttl: Duration,
    ) -> StoreResult<()> {
        let key = keys::lease_key(service_id, instance_id);
        let rev = self
            .store
            .put(&key, ttl.as_secs().to_string().into_bytes())
            .await?;
        let deadline = Instant::now() + ttl;
        self.leases.insert(
            (service_id.to_string(), instance_id.to_string()),
            LeaseRecord {
                domain: domain.to_string(),
                project: project.to_string(),
                ttl,
                deadline,
                lease_rev: rev,
                state: LeaseState::Active,
            },
        );
        self.push_entry(deadline, service_id, instance_id);
        debug!(service_id, instance_id, ttl_secs = ttl.as_secs(), "lease granted");
        Ok(())
    }

    /// Extends the lease to `now + ttl`. Fails with `InstanceNotExists`
    /// when no active lease is known.
    pub async fn renew(&self, service_id: &str, instance_id: &str) -> Result<(), RegistryError> {
        let map_key = (service_id.to_string(), instance_id.to_string());
        let ttl = match self.leases.get(&map_key) {
            Some(rec) if rec.state == LeaseState::Active => rec.ttl,
            _ => return Err(RegistryError::InstanceNotExists),
        };

        // Touch the lease key first so the expiry CAS observes the renewal.
        let key = keys::lease_key(service_id, instance_id);
        let rev = self
            .store
            .put(&key, ttl.as_secs().to_string().into_bytes())
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        match self.leases.get_mut(&map_key) {
            Some(mut rec) if rec.state == LeaseState::Active => {
                rec.deadline = Instant::now() + rec.ttl;
                rec.lease_rev = rev;
                let deadline = rec.deadline;
                drop(rec);
                self.push_entry(deadline, service_id, instance_id);
                Ok(())
            }
            _ => Err(RegistryError::InstanceNotExists),
        }
    }

    /// Drops the lease on explicit unregister. The caller deletes the
    /// instance and lease keys in its own transaction.
    pub fn cancel(&self, service_id: &str, instance_id: &str) {
        let removed = self
            .leases
            .remove(&(service_id.to_string(), instance_id.to_string()));
        if removed.is_some() {
            debug!(service_id, instance_id, "lease cancelled");
        }
    }

    pub fn state(&self, service_id: &str, instance_id: &str) -> Option<LeaseState> {
        self.leases
            .get(&(service_id.to_string(), instance_id.to_string()))
            .map(|rec| rec.state)
    }

    pub fn active_count(&self) -> usize {
        self.leases.len()
    }

    /// Runs the expiry dispatcher until `stop`.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("lease dispatcher already running");
            return;
        }
        info!("lease dispatcher started");
        while self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            let mut due = Vec::new();
            {
                let mut heap = self.heap.lock().unwrap();
                while let Some(Reverse(entry)) = heap.pop() {
                    if entry.0 <= now {
                        due.push(entry);
                    } else {
                        heap.push(Reverse(entry));
                        break;
                    }
                }
            }
            if !due.is_empty() {
                for (_, _, service_id, instance_id) in due {
                    self.try_expire(&service_id, &instance_id).await;
                }
                continue;
            }

            let next_deadline = {
                let heap = self.heap.lock().unwrap();
                heap.peek().map(|Reverse(entry)| entry.0)
            };
            let kicked = self.timer_kick.notified();
            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = kicked => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = kicked => {}
                    }
                }
            }
        }
        info!("lease dispatcher stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.timer_kick.notify_waiters();
    }

    /// Fires one expiry if the lease is still due. Stale heap entries
    /// (renewed or cancelled leases) are skipped.
    async fn try_expire(&self, service_id: &str, instance_id: &str) {
        let map_key = (service_id.to_string(), instance_id.to_string());
        let (domain, project, lease_rev) = match self.leases.get(&map_key) {
            Some(rec) if rec.state == LeaseState::Active && rec.deadline <= Instant::now() => {
                (rec.domain.clone(), rec.project.clone(), rec.lease_rev)
            }
            _ => return,
        };

        let lease_key = keys::lease_key(service_id, instance_id);
        let instance_key = keys::instance_key(&domain, &project, service_id, instance_id);
        self.ledger.insert(map_key.clone(), ());
        let result = self
            .store
            .txn(
                vec![Compare::mod_rev_eq(&lease_key, lease_rev)],
                vec![TxnOp::delete(&instance_key), TxnOp::delete(&lease_key)],
                vec![],
            )
            .await;
        match result {
            Ok(resp) if resp.succeeded => {
                self.leases.remove(&map_key);
                info!(service_id, instance_id, "lease expired, instance deleted");
            }
            Ok(_) => {
                // Someone renewed between our deadline check and the
                // transaction; the newer heap entry takes over.
                self.ledger.remove(&map_key);
                debug!(service_id, instance_id, "expiry lost the race to a renewal");
            }
            Err(err) => {
                // The lease stays active and the expiry is retried.
                self.ledger.remove(&map_key);
                warn!(service_id, instance_id, %err, "expiry delete failed, retrying");
                self.push_entry(Instant::now() + EXPIRE_RETRY_DELAY, service_id, instance_id);
            }
        }
    }
}

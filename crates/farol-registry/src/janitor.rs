//! Periodic cleanup of abandoned services
//!
//! Every `service_clear_interval` the janitor takes a cluster-wide
//! advisory lock (skipping the tick when another node holds it) and
//! deletes services that have had zero instances for longer than
//! `service_ttl`. The zero-instance check is re-evaluated inside the
//! delete transaction, so an instance registered between the scan and the
//! delete keeps its service alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use farol_common::utils::now_sec;
use farol_store::{keys, Compare, DistLock, KvStore, TxnOp};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::options::RegistryOptions;

const LOCK_NAME: &str = "janitor";

#[derive(Clone)]
pub struct Janitor {
    store: Arc<dyn KvStore>,
    cache: CacheManager,
    opts: RegistryOptions,
    holder: String,
    running: Arc<AtomicBool>,
    stop_kick: Arc<Notify>,
}

impl Janitor {
    pub fn new(store: Arc<dyn KvStore>, cache: CacheManager, opts: RegistryOptions) -> Self {
        Janitor {
            store,
            cache,
            opts,
            holder: uuid::Uuid::new_v4().simple().to_string(),
            running: Arc::new(AtomicBool::new(false)),
            stop_kick: Arc::new(Notify::new()),
        }
    }

    /// Runs the periodic sweep until `stop`.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("janitor already running");
            return;
        }
        info!(
            interval_secs = self.opts.service_clear_interval.as_secs(),
            service_ttl_secs = self.opts.service_ttl.as_secs(),
            "janitor started"
        );
        while self.running.load(Ordering::SeqCst) {
            let stopped = self.stop_kick.notified();
            tokio::select! {
                _ = tokio::time::sleep(self.opts.service_clear_interval) => {}
                _ = stopped => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.tick().await;
        }
        info!("janitor stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_kick.notify_waiters();
    }

    async fn tick(&self) {
        let mut lock = DistLock::new(
            self.store.clone(),
            LOCK_NAME,
            &self.holder,
            self.opts.service_clear_interval,
        );
        match lock.try_acquire().await {
            Ok(true) => {}
            Ok(false) => {
                debug!("janitor lock held elsewhere, skipping tick");
                return;
            }
            Err(err) => {
                warn!(%err, "janitor lock unavailable, skipping tick");
                return;
            }
        }
        self.run_sweep().await;
        if let Err(err) = lock.release().await {
            warn!(%err, "failed to release janitor lock");
        }
    }

    /// One sweep over every tenant. Returns the number of services
    /// removed.
    pub async fn run_sweep(&self) -> usize {
        let ttl_secs = self.opts.service_ttl.as_secs() as i64;
        let now = now_sec();
        let mut removed = 0usize;
        let mut examined = 0usize;
        for (domain, project) in self.cache.domain_projects() {
            for entry in self.cache.services_in(&domain, &project) {
                examined += 1;
                let service_id = &entry.service.service_id;
                if self.cache.instance_count(service_id) > 0 {
                    continue;
                }
                let last_activity = entry
                    .service
                    .mod_timestamp
                    .parse::<i64>()
                    .unwrap_or_else(|_| entry.service.create_time());
                if now - last_activity <= ttl_secs {
                    continue;
                }

                let service_key = keys::service_key(&domain, &project, service_id);
                let instance_prefix = keys::instance_prefix(&domain, &project, service_id);
                let index_key = keys::index_key(
                    &domain,
                    &project,
                    &entry.service.environment,
                    &entry.service.app_id,
                    &entry.service.service_name,
                    &entry.service.version,
                );
                let result = self
                    .store
                    .txn(
                        vec![
                            // Still untouched and still empty, checked
                            // atomically with the delete.
                            Compare::mod_rev_eq(&service_key, entry.mod_rev),
                            Compare::prefix_count_eq(&instance_prefix, 0),
                        ],
                        vec![
                            TxnOp::delete(&service_key),
                            TxnOp::delete(&index_key),
                            TxnOp::delete_prefix(&keys::lease_prefix(service_id)),
                        ],
                        vec![],
                    )
                    .await;
                match result {
                    Ok(resp) if resp.succeeded => {
                        removed += 1;
                        info!(
                            service_id = %service_id,
                            service_name = %entry.service.service_name,
                            "abandoned service removed"
                        );
                    }
                    Ok(_) => {
                        debug!(service_id = %service_id, "service became active, kept");
                    }
                    Err(err) => {
                        warn!(service_id = %service_id, %err, "sweep delete failed");
                    }
                }
            }
        }
        info!(examined, removed, "service sweep finished");
        removed
    }
}

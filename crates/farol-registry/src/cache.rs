//! In-memory cache indexes over the store
//!
//! One indexer per entity kind, fed by store watches. Readers see the
//! latest applied state per entry; every entry carries the store revision
//! it was applied at, and `highest_rev` tracks the newest revision seen
//! anywhere. Events are applied in revision order per prefix; cross-prefix
//! ordering is only weakly consistent, which is why discovery responses
//! are stamped with revisions instead of relying on arrival order.
//!
//! Recovery: a full range load seeds each index, then a watch is opened at
//! the returned revision. A dropped watch triggers a re-range that diffs
//! against the current index (publishing the changes it finds) and
//! resumes, with exponential backoff capped at 30 seconds. A periodic
//! refresh runs the same diff as a backstop.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use farol_api::registry::model::{MicroService, MicroServiceInstance};
use farol_store::{keys, EventType, KvStore, StoreResult, WatchEvent};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::lease::ExpiryLedger;
use crate::notify::{ChangeAction, EventBus, NotifyEvent};

const MAX_WATCH_BACKOFF: Duration = Duration::from_secs(30);

/// A cached microservice with its tenant and revision.
#[derive(Clone, Debug)]
pub struct ServiceEntry {
    pub service: MicroService,
    pub domain: String,
    pub project: String,
    pub mod_rev: i64,
}

/// A cached instance with its tenant and revision.
#[derive(Clone, Debug)]
pub struct InstanceEntry {
    pub instance: MicroServiceInstance,
    pub domain: String,
    pub project: String,
    pub mod_rev: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Service,
    Instance,
    Index,
}

impl Kind {
    fn prefix(&self) -> String {
        match self {
            Kind::Service => keys::all_services_prefix(),
            Kind::Instance => keys::all_instances_prefix(),
            Kind::Index => keys::all_index_prefix(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Kind::Service => "service",
            Kind::Instance => "instance",
            Kind::Index => "index",
        }
    }
}

/// Watch-fed cache over services, instances and the service-key index.
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn KvStore>,
    bus: Arc<EventBus>,
    /// service id -> service record
    services: Arc<DashMap<String, ServiceEntry>>,
    /// service id -> instance id -> instance record
    instances: Arc<DashMap<String, DashMap<String, InstanceEntry>>>,
    /// full index key -> service id
    index: Arc<DashMap<String, String>>,
    /// "{domain}/{project}" -> service ids
    by_domain_project: Arc<DashMap<String, HashSet<String>>>,
    highest_rev: Arc<AtomicI64>,
    cursor_service: Arc<AtomicI64>,
    cursor_instance: Arc<AtomicI64>,
    cursor_index: Arc<AtomicI64>,
    /// Instances deleted by lease expiry, so their cache delete event is
    /// reported as EXPIRE instead of DELETE.
    expiry_ledger: Arc<ExpiryLedger>,
    cache_ttl: Duration,
    running: Arc<AtomicBool>,
    stop_kick: Arc<Notify>,
}

impl CacheManager {
    pub fn new(
        store: Arc<dyn KvStore>,
        bus: Arc<EventBus>,
        expiry_ledger: Arc<ExpiryLedger>,
        cache_ttl: Duration,
    ) -> Self {
        CacheManager {
            store,
            bus,
            services: Arc::new(DashMap::new()),
            instances: Arc::new(DashMap::new()),
            index: Arc::new(DashMap::new()),
            by_domain_project: Arc::new(DashMap::new()),
            highest_rev: Arc::new(AtomicI64::new(0)),
            cursor_service: Arc::new(AtomicI64::new(0)),
            cursor_instance: Arc::new(AtomicI64::new(0)),
            cursor_index: Arc::new(AtomicI64::new(0)),
            expiry_ledger,
            cache_ttl,
            running: Arc::new(AtomicBool::new(false)),
            stop_kick: Arc::new(Notify::new()),
        }
    }

    fn cursor(&self, kind: Kind) -> &AtomicI64 {
        match kind {
            Kind::Service => &self.cursor_service,
            Kind::Instance => &self.cursor_instance,
            Kind::Index => &self.cursor_index,
        }
    }

    /// Seeds every index with a full range load. Must run before `start`.
    pub async fn bootstrap(&self) -> StoreResult<()> {
        for kind in [Kind::Service, Kind::Instance, Kind::Index] {
            let resp = self.store.range(&kind.prefix()).await?;
            for kv in &resp.kvs {
                let event = WatchEvent {
                    event_type: EventType::Put,
                    key: kv.key.clone(),
                    value: kv.value.clone(),
                    rev: kv.mod_rev,
                };
                self.apply(kind, &event, false);
            }
            self.cursor(kind).store(resp.rev, Ordering::SeqCst);
            self.highest_rev.fetch_max(resp.rev, Ordering::SeqCst);
        }
        info!(
            services = self.services.len(),
            instances = self.instances.iter().map(|e| e.value().len()).sum::<usize>(),
            rev = self.highest_rev(),
            "cache bootstrapped"
        );
        Ok(())
    }

    /// Spawns the watch loops and the periodic refresh backstop.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        for kind in [Kind::Service, Kind::Instance, Kind::Index] {
            let cache = self.clone();
            tokio::spawn(async move { cache.run_watch(kind).await });
        }
        let cache = self.clone();
        tokio::spawn(async move { cache.run_refresh().await });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_kick.notify_waiters();
    }

    async fn run_watch(&self, kind: Kind) {
        let prefix = kind.prefix();
        let mut backoff = Duration::from_secs(1);
        while self.running.load(Ordering::SeqCst) {
            let from = self.cursor(kind).load(Ordering::SeqCst);
            match self.store.watch(&prefix, from).await {
                Ok(mut watcher) => {
                    backoff = Duration::from_secs(1);
                    loop {
                        let stopped = self.stop_kick.notified();
                        tokio::select! {
                            event = watcher.next() => match event {
                                Some(event) => {
                                    self.apply(kind, &event, true);
                                    self.cursor(kind).store(event.rev, Ordering::SeqCst);
                                }
                                None => break,
                            },
                            _ = stopped => {}
                        }
                        if !self.running.load(Ordering::SeqCst) {
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!(kind = kind.name(), %err, "failed to open watch");
                }
            }
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            warn!(
                kind = kind.name(),
                backoff_ms = backoff.as_millis() as u64,
                "watch lost, re-ranging"
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_WATCH_BACKOFF);
            if let Err(err) = self.reload(kind).await {
                warn!(kind = kind.name(), %err, "re-range failed");
            }
        }
    }

    async fn run_refresh(&self) {
        loop {
            let stopped = self.stop_kick.notified();
            tokio::select! {
                _ = tokio::time::sleep(self.cache_ttl) => {}
                _ = stopped => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            for kind in [Kind::Service, Kind::Instance, Kind::Index] {
                if let Err(err) = self.reload(kind).await {
                    warn!(kind = kind.name(), %err, "cache refresh failed");
                }
            }
            debug!("cache refresh completed");
        }
    }

    /// Re-ranges one prefix and applies the differences against the
    /// current index, publishing the changes it finds.
    async fn reload(&self, kind: Kind) -> StoreResult<()> {
        let resp = self.store.range(&kind.prefix()).await?;
        let snapshot: HashSet<&str> = resp.kvs.iter().map(|kv| kv.key.as_str()).collect();

        // Entries that disappeared while the watch was down.
        for (key, value, mod_rev) in self.known_entries(kind) {
            if snapshot.contains(key.as_str()) || mod_rev > resp.rev {
                continue;
            }
            let event = WatchEvent {
                event_type: EventType::Delete,
                key,
                value,
                rev: resp.rev,
            };
            self.apply(kind, &event, true);
        }

        // New or moved-on entries.
        for kv in &resp.kvs {
            if self.known_mod_rev(kind, &kv.key) >= Some(kv.mod_rev) {
                continue;
            }
            let event = WatchEvent {
                event_type: EventType::Put,
                key: kv.key.clone(),
                value: kv.value.clone(),
                rev: kv.mod_rev,
            };
            self.apply(kind, &event, true);
        }

        self.cursor(kind).fetch_max(resp.rev, Ordering::SeqCst);
        self.highest_rev.fetch_max(resp.rev, Ordering::SeqCst);
        Ok(())
    }

    /// Current keys of a kind with their serialized values and revisions.
    fn known_entries(&self, kind: Kind) -> Vec<(String, Vec<u8>, i64)> {
        match kind {
            Kind::Service => self
                .services
                .iter()
                .map(|e| {
                    (
                        keys::service_key(&e.domain, &e.project, e.key()),
                        serde_json::to_vec(&e.service).unwrap_or_default(),
                        e.mod_rev,
                    )
                })
                .collect(),
            Kind::Instance => self
                .instances
                .iter()
                .flat_map(|per_service| {
                    per_service
                        .value()
                        .iter()
                        .map(|e| {
                            (
                                keys::instance_key(
                                    &e.domain,
                                    &e.project,
                                    &e.instance.service_id,
                                    e.key(),
                                ),
                                serde_json::to_vec(&e.instance).unwrap_or_default(),
                                e.mod_rev,
                            )
                        })
                        .collect::<Vec<_>>()
                })
                .collect(),
            Kind::Index => self
                .index
                .iter()
                .map(|e| (e.key().clone(), e.value().clone().into_bytes(), 0))
                .collect(),
        }
    }

    fn known_mod_rev(&self, kind: Kind, key: &str) -> Option<i64> {
        match kind {
            Kind::Service => {
                let segs = keys::segments(key);
                segs.last()
                    .and_then(|sid| self.services.get(*sid))
                    .map(|e| e.mod_rev)
            }
            Kind::Instance => {
                let segs = keys::segments(key);
                if segs.len() != 6 {
                    return None;
                }
                self.instances
                    .get(segs[4])
                    .and_then(|m| m.get(segs[5]).map(|e| e.mod_rev))
            }
            // The index carries no revision of its own; apply puts freely.
            Kind::Index => None,
        }
    }

    fn apply(&self, kind: Kind, event: &WatchEvent, publish: bool) {
        self.highest_rev.fetch_max(event.rev, Ordering::SeqCst);
        match kind {
            Kind::Service => self.apply_service(event, publish),
            Kind::Instance => self.apply_instance(event, publish),
            Kind::Index => self.apply_index(event),
        }
    }

    fn apply_service(&self, event: &WatchEvent, publish: bool) {
        let segs = keys::segments(&event.key);
        if segs.len() != 5 {
            warn!(key = %event.key, "malformed service key");
            return;
        }
        let (domain, project, service_id) = (segs[2], segs[3], segs[4]);
        match event.event_type {
            EventType::Put => {
                let service: MicroService = match serde_json::from_slice(&event.value) {
                    Ok(s) => s,
                    Err(err) => {
                        warn!(key = %event.key, %err, "undecodable service value");
                        return;
                    }
                };
                let action = if self.services.contains_key(service_id) {
                    ChangeAction::Update
                } else {
                    ChangeAction::Create
                };
                self.services.insert(
                    service_id.to_string(),
                    ServiceEntry {
                        service: service.clone(),
                        domain: domain.to_string(),
                        project: project.to_string(),
                        mod_rev: event.rev,
                    },
                );
                self.by_domain_project
                    .entry(format!("{}/{}", domain, project))
                    .or_default()
                    .insert(service_id.to_string());
                if publish {
                    self.bus.publish(&NotifyEvent {
                        action,
                        domain: domain.to_string(),
                        project: project.to_string(),
                        service: Some(service),
                        instance: None,
                        rev: event.rev,
                    });
                }
            }
            EventType::Delete => {
                let removed = self.services.remove(service_id).map(|(_, e)| e.service);
                if let Some(mut set) = self
                    .by_domain_project
                    .get_mut(&format!("{}/{}", domain, project))
                {
                    set.remove(service_id);
                }
                self.instances.remove(service_id);
                let service = removed.or_else(|| serde_json::from_slice(&event.value).ok());
                if publish {
                    self.bus.publish(&NotifyEvent {
                        action: ChangeAction::Delete,
                        domain: domain.to_string(),
                        project: project.to_string(),
                        service,
                        instance: None,
                        rev: event.rev,
                    });
                }
            }
        }
    }

    fn apply_instance(&self, event: &WatchEvent, publish: bool) {
        let segs = keys::segments(&event.key);
        if segs.len() != 6 {
            warn!(key = %event.key, "malformed instance key");
            return;
        }
        let (domain, project, service_id, instance_id) = (segs[2], segs[3], segs[4], segs[5]);
        let owner = self.services.get(service_id).map(|e| e.service.clone());
        match event.event_type {
            EventType::Put => {
                let instance: MicroServiceInstance = match serde_json::from_slice(&event.value) {
                    Ok(i) => i,
                    Err(err) => {
                        warn!(key = %event.key, %err, "undecodable instance value");
                        return;
                    }
                };
                let per_service = self.instances.entry(service_id.to_string()).or_default();
                let action = if per_service.contains_key(instance_id) {
                    ChangeAction::Update
                } else {
                    ChangeAction::Create
                };
                per_service.insert(
                    instance_id.to_string(),
                    InstanceEntry {
                        instance: instance.clone(),
                        domain: domain.to_string(),
                        project: project.to_string(),
                        mod_rev: event.rev,
                    },
                );
                drop(per_service);
                if publish {
                    self.bus.publish(&NotifyEvent {
                        action,
                        domain: domain.to_string(),
                        project: project.to_string(),
                        service: owner,
                        instance: Some(instance),
                        rev: event.rev,
                    });
                }
            }
            EventType::Delete => {
                let removed = self
                    .instances
                    .get(service_id)
                    .and_then(|m| m.remove(instance_id).map(|(_, e)| e.instance));
                let instance =
                    removed.or_else(|| serde_json::from_slice(&event.value).ok());
                let ledger_key = (service_id.to_string(), instance_id.to_string());
                let action = if self.expiry_ledger.remove(&ledger_key).is_some() {
                    ChangeAction::Expire
                } else {
                    ChangeAction::Delete
                };
                if publish {
                    self.bus.publish(&NotifyEvent {
                        action,
                        domain: domain.to_string(),
                        project: project.to_string(),
                        service: owner,
                        instance,
                        rev: event.rev,
                    });
                }
            }
        }
    }

    fn apply_index(&self, event: &WatchEvent) {
        match event.event_type {
            EventType::Put => {
                let service_id = String::from_utf8_lossy(&event.value).to_string();
                self.index.insert(event.key.clone(), service_id);
            }
            EventType::Delete => {
                self.index.remove(&event.key);
            }
        }
    }

    // Readers

    pub fn highest_rev(&self) -> i64 {
        self.highest_rev.load(Ordering::SeqCst)
    }

    pub fn get_service(&self, service_id: &str) -> Option<ServiceEntry> {
        self.services.get(service_id).map(|e| e.clone())
    }

    pub fn service_id_by_index(&self, index_key: &str) -> Option<String> {
        self.index.get(index_key).map(|e| e.clone())
    }

    /// All registered versions of one service name, as
    /// `(version, serviceId)` pairs.
    pub fn versions_of(
        &self,
        domain: &str,
        project: &str,
        environment: &str,
        app_id: &str,
        service_name: &str,
    ) -> Vec<(String, String)> {
        let prefix = keys::index_versions_prefix(domain, project, environment, app_id, service_name);
        self.index
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| (e.key()[prefix.len()..].to_string(), e.value().clone()))
            .collect()
    }

    pub fn get_instance(&self, service_id: &str, instance_id: &str) -> Option<InstanceEntry> {
        self.instances
            .get(service_id)
            .and_then(|m| m.get(instance_id).map(|e| e.clone()))
    }

    /// Instances of a service, ordered by instance id for deterministic
    /// responses.
    pub fn instances_of(&self, service_id: &str) -> Vec<InstanceEntry> {
        let mut entries: Vec<InstanceEntry> = self
            .instances
            .get(service_id)
            .map(|m| m.iter().map(|e| e.clone()).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.instance.instance_id.cmp(&b.instance.instance_id));
        entries
    }

    pub fn instance_count(&self, service_id: &str) -> usize {
        self.instances
            .get(service_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub fn domain_projects(&self) -> Vec<(String, String)> {
        self.by_domain_project
            .iter()
            .filter_map(|e| {
                e.key()
                    .split_once('/')
                    .map(|(d, p)| (d.to_string(), p.to_string()))
            })
            .collect()
    }

    pub fn services_in(&self, domain: &str, project: &str) -> Vec<ServiceEntry> {
        let ids = self
            .by_domain_project
            .get(&format!("{}/{}", domain, project))
            .map(|set| set.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.get_service(id))
            .collect()
    }
}

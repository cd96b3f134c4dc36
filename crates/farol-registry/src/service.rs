//! Registry write path
//!
//! Registration and unregistration of services and instances. All writes
//! go through store transactions; the cache follows through its watch, so
//! readers never see state the store has not accepted. Mutations of one
//! service are serialized through a per-service mutex to keep the cache
//! free of torn state.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use farol_api::discovery::model::{HeartbeatElement, HeartbeatResult};
use farol_api::registry::model::{InstanceStatus, MicroService, MicroServiceInstance};
use farol_api::validation;
use farol_common::error::{RegistryError, ERR_SERVICE_HAS_INSTANCES, SUCCESS};
use farol_common::utils::now_sec_string;
use farol_store::{keys, with_retry, Compare, KvStore, StoreError, TxnOp};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cache::CacheManager;
use crate::dependency::DependencyTracker;
use crate::lease::LeaseManager;

/// Service property carrying a per-service default lease TTL in seconds.
const PROP_INSTANCE_TTL: &str = "instanceTTL";

type Result<T> = std::result::Result<T, RegistryError>;

fn store_err(err: StoreError) -> RegistryError {
    match err {
        StoreError::Unavailable(reason) => RegistryError::Unavailable(reason),
        StoreError::Conflict => RegistryError::Conflict("store precondition failed".to_string()),
        other => RegistryError::Internal(other.to_string()),
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Clone)]
pub struct RegistryService {
    store: Arc<dyn KvStore>,
    cache: CacheManager,
    leases: LeaseManager,
    deps: DependencyTracker,
    service_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl RegistryService {
    pub fn new(
        store: Arc<dyn KvStore>,
        cache: CacheManager,
        leases: LeaseManager,
        deps: DependencyTracker,
    ) -> Self {
        RegistryService {
            store,
            cache,
            leases,
            deps,
            service_locks: Arc::new(DashMap::new()),
        }
    }

    async fn lock_service(&self, service_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = self
            .service_locks
            .entry(service_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Registers a microservice. Registering an already-known service key
    /// without a conflicting id is idempotent and returns the existing id.
    pub async fn register_service(
        &self,
        domain: &str,
        project: &str,
        mut service: MicroService,
    ) -> Result<String> {
        validation::validate_tenant("domain", domain)?;
        validation::validate_tenant("project", project)?;
        validation::validate_service(&service)?;

        let index_key = keys::index_key(
            domain,
            project,
            &service.environment,
            &service.app_id,
            &service.service_name,
            &service.version,
        );
        if let Some(kv) = with_retry("get-index", || self.store.get(&index_key))
            .await
            .map_err(store_err)?
        {
            let existing = String::from_utf8_lossy(&kv.value).to_string();
            if !service.service_id.is_empty() && service.service_id != existing {
                return Err(RegistryError::ServiceAlreadyExists(service.service_name));
            }
            return Ok(existing);
        }

        if service.service_id.is_empty() {
            service.service_id = new_id();
        }
        let now = now_sec_string();
        service.timestamp = now.clone();
        service.mod_timestamp = now;

        let service_key = keys::service_key(domain, project, &service.service_id);
        let value = serde_json::to_vec(&service).map_err(RegistryError::internal)?;
        let resp = self
            .store
            .txn(
                vec![Compare::absent(&index_key)],
                vec![
                    TxnOp::put(&service_key, value),
                    TxnOp::put(&index_key, service.service_id.clone().into_bytes()),
                ],
                vec![],
            )
            .await
            .map_err(store_err)?;
        if !resp.succeeded {
            // Lost a concurrent registration of the same key; adopt it.
            let kv = self
                .store
                .get(&index_key)
                .await
                .map_err(store_err)?
                .ok_or_else(|| RegistryError::Internal("index vanished".to_string()))?;
            return Ok(String::from_utf8_lossy(&kv.value).to_string());
        }
        info!(
            service_id = %service.service_id,
            app_id = %service.app_id,
            service_name = %service.service_name,
            version = %service.version,
            "microservice registered"
        );
        Ok(service.service_id)
    }

    pub async fn get_service(
        &self,
        domain: &str,
        project: &str,
        service_id: &str,
    ) -> Result<MicroService> {
        match self.cache.get_service(service_id) {
            Some(entry) if entry.domain == domain && entry.project == project => Ok(entry.service),
            _ => {
                // The cache may lag a fresh registration; fall back to the store.
                let key = keys::service_key(domain, project, service_id);
                let kv = self
                    .store
                    .get(&key)
                    .await
                    .map_err(store_err)?
                    .ok_or(RegistryError::ServiceNotExists)?;
                serde_json::from_slice(&kv.value).map_err(RegistryError::internal)
            }
        }
    }

    pub fn list_services(&self, domain: &str, project: &str) -> Vec<MicroService> {
        let mut services: Vec<MicroService> = self
            .cache
            .services_in(domain, project)
            .into_iter()
            .map(|e| e.service)
            .collect();
        services.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        services
    }

    /// Unregisters a service. Refused while instances exist unless
    /// `force`; the zero-instance check runs inside the delete
    /// transaction, so a concurrent registration wins the race.
    pub async fn unregister_service(
        &self,
        domain: &str,
        project: &str,
        service_id: &str,
        force: bool,
    ) -> Result<()> {
        let _guard = self.lock_service(service_id).await;
        let service = self.get_service(domain, project, service_id).await?;

        let service_key = keys::service_key(domain, project, service_id);
        let instance_prefix = keys::instance_prefix(domain, project, service_id);
        let index_key = keys::index_key(
            domain,
            project,
            &service.environment,
            &service.app_id,
            &service.service_name,
            &service.version,
        );

        let mut compares = vec![Compare::exists(&service_key)];
        if !force {
            compares.push(Compare::prefix_count_eq(&instance_prefix, 0));
        }
        let ops = vec![
            TxnOp::delete(&service_key),
            TxnOp::delete(&index_key),
            TxnOp::delete_prefix(&instance_prefix),
            TxnOp::delete_prefix(&keys::lease_prefix(service_id)),
        ];
        let resp = self
            .store
            .txn(compares, ops, vec![])
            .await
            .map_err(store_err)?;
        if !resp.succeeded {
            let instances = self
                .store
                .range(&instance_prefix)
                .await
                .map_err(store_err)?;
            if !instances.kvs.is_empty() {
                return Err(RegistryError::Conflict(
                    ERR_SERVICE_HAS_INSTANCES.message.to_string(),
                ));
            }
            return Err(RegistryError::ServiceNotExists);
        }

        for entry in self.cache.instances_of(service_id) {
            self.leases.cancel(service_id, &entry.instance.instance_id);
        }
        self.deps.forget_consumer(domain, project, service_id).await;
        self.service_locks.remove(service_id);
        info!(service_id, force, "microservice unregistered");
        Ok(())
    }

    /// Registers an instance. Re-registering the same
    /// `(serviceId, endpoints, hostName)` is idempotent and returns the
    /// prior instance id with its lease refreshed.
    pub async fn register_instance(
        &self,
        domain: &str,
        project: &str,
        mut instance: MicroServiceInstance,
    ) -> Result<String> {
        validation::validate_instance(&instance)?;
        let service_id = instance.service_id.clone();
        let service = self.get_service(domain, project, &service_id).await?;
        let _guard = self.lock_service(&service_id).await;

        if instance.instance_id.is_empty() {
            // Idempotency check against the store, not the cache: a
            // re-register racing the watch must still find its twin.
            let existing = self
                .store
                .range(&keys::instance_prefix(domain, project, &service_id))
                .await
                .map_err(store_err)?
                .kvs
                .into_iter()
                .filter_map(|kv| serde_json::from_slice::<MicroServiceInstance>(&kv.value).ok())
                .find(|known| known.same_endpoints(&instance));
            if let Some(known) = existing {
                let _ = self.leases.renew(&service_id, &known.instance_id).await;
                return Ok(known.instance_id);
            }
            instance.instance_id = new_id();
        }
        let now = now_sec_string();
        if instance.timestamp.is_empty() {
            instance.timestamp = now.clone();
        }
        instance.mod_timestamp = now;

        let ttl = self.leases.resolve_ttl(
            instance.health_check.as_ref().map(|hc| hc.ttl_seconds()),
            service
                .properties
                .get(PROP_INSTANCE_TTL)
                .and_then(|v| v.parse().ok()),
        );

        let instance_key =
            keys::instance_key(domain, project, &service_id, &instance.instance_id);
        let service_key = keys::service_key(domain, project, &service_id);
        let value = serde_json::to_vec(&instance).map_err(RegistryError::internal)?;
        let resp = self
            .store
            .txn(
                // The owning service must still exist.
                vec![Compare::exists(&service_key)],
                vec![TxnOp::put(&instance_key, value)],
                vec![],
            )
            .await
            .map_err(store_err)?;
        if !resp.succeeded {
            return Err(RegistryError::ServiceNotExists);
        }
        self.leases
            .grant(domain, project, &service_id, &instance.instance_id, ttl)
            .await
            .map_err(store_err)?;
        info!(
            service_id = %service_id,
            instance_id = %instance.instance_id,
            host_name = %instance.host_name,
            ttl_secs = ttl.as_secs(),
            "instance registered"
        );
        Ok(instance.instance_id)
    }

    pub async fn unregister_instance(
        &self,
        domain: &str,
        project: &str,
        service_id: &str,
        instance_id: &str,
    ) -> Result<()> {
        self.get_service(domain, project, service_id).await?;
        let instance_key = keys::instance_key(domain, project, service_id, instance_id);
        self.store
            .get(&instance_key)
            .await
            .map_err(store_err)?
            .ok_or(RegistryError::InstanceNotExists)?;

        self.leases.cancel(service_id, instance_id);
        self.store
            .txn(
                vec![],
                vec![
                    TxnOp::delete(&instance_key),
                    TxnOp::delete(&keys::lease_key(service_id, instance_id)),
                ],
                vec![],
            )
            .await
            .map_err(store_err)?;
        info!(service_id, instance_id, "instance unregistered");
        Ok(())
    }

    /// Renews one lease. `Ok` iff the service and instance exist and the
    /// lease is active.
    pub async fn heartbeat(
        &self,
        domain: &str,
        project: &str,
        service_id: &str,
        instance_id: &str,
    ) -> Result<()> {
        match self.leases.renew(service_id, instance_id).await {
            Ok(()) => Ok(()),
            Err(RegistryError::InstanceNotExists) => {
                match self.get_service(domain, project, service_id).await {
                    Ok(_) => Err(RegistryError::InstanceNotExists),
                    Err(_) => Err(RegistryError::ServiceNotExists),
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Renews a batch of leases. An element failure never aborts the
    /// batch; each element reports its own outcome.
    pub async fn heartbeat_set(
        &self,
        domain: &str,
        project: &str,
        elements: &[HeartbeatElement],
    ) -> Vec<HeartbeatResult> {
        let mut results = Vec::with_capacity(elements.len());
        for element in elements {
            let outcome = self
                .heartbeat(domain, project, &element.service_id, &element.instance_id)
                .await;
            let (error_code, err_message) = match &outcome {
                Ok(()) => (SUCCESS.code, String::new()),
                Err(err) => {
                    warn!(
                        service_id = %element.service_id,
                        instance_id = %element.instance_id,
                        %err,
                        "heartbeat element failed"
                    );
                    (err.code(), err.to_string())
                }
            };
            results.push(HeartbeatResult {
                service_id: element.service_id.clone(),
                instance_id: element.instance_id.clone(),
                error_code,
                err_message,
            });
        }
        results
    }

    pub async fn update_instance_status(
        &self,
        domain: &str,
        project: &str,
        service_id: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<()> {
        self.mutate_instance(domain, project, service_id, instance_id, |instance| {
            instance.status = status;
        })
        .await
    }

    pub async fn update_instance_properties(
        &self,
        domain: &str,
        project: &str,
        service_id: &str,
        instance_id: &str,
        properties: HashMap<String, String>,
    ) -> Result<()> {
        self.mutate_instance(domain, project, service_id, instance_id, move |instance| {
            instance.properties = properties;
        })
        .await
    }

    pub async fn update_service_properties(
        &self,
        domain: &str,
        project: &str,
        service_id: &str,
        properties: HashMap<String, String>,
    ) -> Result<()> {
        let _guard = self.lock_service(service_id).await;
        let mut service = self.get_service(domain, project, service_id).await?;
        service.properties = properties;
        service.mod_timestamp = now_sec_string();
        let key = keys::service_key(domain, project, service_id);
        let value = serde_json::to_vec(&service).map_err(RegistryError::internal)?;
        self.store.put(&key, value).await.map_err(store_err)?;
        Ok(())
    }

    async fn mutate_instance<F>(
        &self,
        domain: &str,
        project: &str,
        service_id: &str,
        instance_id: &str,
        mutate: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut MicroServiceInstance),
    {
        self.get_service(domain, project, service_id).await?;
        let _guard = self.lock_service(service_id).await;
        let key = keys::instance_key(domain, project, service_id, instance_id);
        let kv = self
            .store
            .get(&key)
            .await
            .map_err(store_err)?
            .ok_or(RegistryError::InstanceNotExists)?;
        let mut instance: MicroServiceInstance =
            serde_json::from_slice(&kv.value).map_err(RegistryError::internal)?;
        mutate(&mut instance);
        instance.mod_timestamp = now_sec_string();
        let value = serde_json::to_vec(&instance).map_err(RegistryError::internal)?;
        self.store.put(&key, value).await.map_err(store_err)?;
        Ok(())
    }
}

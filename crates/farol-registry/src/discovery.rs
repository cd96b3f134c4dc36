//! Discovery query engine
//!
//! `find_instances` walks consumer visibility, resolves the version rule,
//! joins matched services with their instances and stamps the response
//! with a revision: the maximum store revision over every record
//! consulted. A caller presenting that revision back gets `NotModified`
//! without a payload.
//!
//! Visibility deliberately answers `ServiceNotExists` for anything a
//! consumer may not see, so service existence never leaks across tenants.

use std::sync::Arc;

use farol_api::discovery::model::{
    BatchFindRequest, BatchFindResult, FindFailedResult, FindResult,
};
use farol_api::model::ENV_PRODUCTION;
use farol_api::registry::model::{MicroService, MicroServiceInstance};
use farol_api::validation;
use farol_common::error::RegistryError;
use farol_store::{keys, KvStore, StoreError};
use tracing::debug;

use crate::cache::{CacheManager, InstanceEntry, ServiceEntry};
use crate::dependency::DependencyTracker;
use crate::options::RegistryOptions;
use crate::version::{self, VersionCandidate, VersionRule};

type Result<T> = std::result::Result<T, RegistryError>;

fn store_err(err: StoreError) -> RegistryError {
    match err {
        StoreError::Unavailable(reason) => RegistryError::Unavailable(reason),
        other => RegistryError::Internal(other.to_string()),
    }
}

/// Explicit request context: tenant, consumer identity and caching flags.
/// Responses return their revision by value; nothing travels sideways.
#[derive(Clone, Debug, Default)]
pub struct RequestScope {
    pub domain: String,
    pub project: String,
    /// Service id of the calling consumer; empty for anonymous lookups.
    pub consumer_id: String,
    /// Bypass the cache and read the store directly. The response still
    /// carries a store revision comparable with cached ones.
    pub no_cache: bool,
    /// Revision the caller already holds.
    pub request_rev: Option<String>,
}

impl RequestScope {
    pub fn new(domain: &str, project: &str) -> Self {
        RequestScope {
            domain: domain.to_string(),
            project: project.to_string(),
            ..Default::default()
        }
    }

    pub fn with_consumer(mut self, consumer_id: &str) -> Self {
        self.consumer_id = consumer_id.to_string();
        self
    }

    pub fn with_request_rev(mut self, rev: &str) -> Self {
        self.request_rev = Some(rev.to_string());
        self
    }
}

/// A find-instances query.
#[derive(Clone, Debug, Default)]
pub struct FindRequest {
    pub app_id: String,
    pub service_name: String,
    pub version_rule: String,
    /// Only consulted for anonymous lookups; identified consumers search
    /// their own environment.
    pub environment: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum FindOutcome {
    Updated {
        instances: Vec<MicroServiceInstance>,
        rev: String,
    },
    NotModified {
        rev: String,
    },
}

impl FindOutcome {
    pub fn rev(&self) -> &str {
        match self {
            FindOutcome::Updated { rev, .. } => rev,
            FindOutcome::NotModified { rev } => rev,
        }
    }

    pub fn instances(&self) -> &[MicroServiceInstance] {
        match self {
            FindOutcome::Updated { instances, .. } => instances,
            FindOutcome::NotModified { .. } => &[],
        }
    }

    pub fn is_modified(&self) -> bool {
        matches!(self, FindOutcome::Updated { .. })
    }
}

struct Candidate {
    entry: ServiceEntry,
    version: String,
}

#[derive(Clone)]
pub struct DiscoveryEngine {
    store: Arc<dyn KvStore>,
    cache: CacheManager,
    deps: DependencyTracker,
    opts: RegistryOptions,
}

impl DiscoveryEngine {
    pub fn new(
        store: Arc<dyn KvStore>,
        cache: CacheManager,
        deps: DependencyTracker,
        opts: RegistryOptions,
    ) -> Self {
        DiscoveryEngine {
            store,
            cache,
            deps,
            opts,
        }
    }

    pub async fn find_instances(
        &self,
        scope: &RequestScope,
        req: &FindRequest,
    ) -> Result<FindOutcome> {
        if req.app_id.is_empty() || req.service_name.is_empty() {
            return Err(RegistryError::InvalidParameter(
                "appId and serviceName are required".to_string(),
            ));
        }
        validation::validate_version_rule(&req.version_rule)?;
        let rule = VersionRule::parse(&req.version_rule)?;

        let (consumer_app, environment) = if scope.consumer_id.is_empty() {
            (
                req.app_id.clone(),
                req.environment.clone().unwrap_or_default(),
            )
        } else {
            let consumer = self.service_entry(scope, &scope.consumer_id).await?;
            (
                consumer.service.app_id.clone(),
                consumer.service.environment.clone(),
            )
        };

        let mut candidates = self
            .candidates(
                scope.no_cache,
                &scope.domain,
                &scope.project,
                &environment,
                &req.app_id,
                &req.service_name,
            )
            .await?;
        if candidates.is_empty() && self.opts.is_global_visible(&req.service_name) {
            // Globally visible providers live in the default tenant and
            // are exported in production only.
            candidates = self
                .candidates(
                    scope.no_cache,
                    &self.opts.default_domain,
                    &self.opts.default_project,
                    ENV_PRODUCTION,
                    &req.app_id,
                    &req.service_name,
                )
                .await?;
        }
        if candidates.is_empty() {
            return Err(RegistryError::ServiceNotExists);
        }

        // The revision covers every record consulted, before filtering,
        // so filtered-out responses stay comparable across calls.
        let mut max_rev = candidates.iter().map(|c| c.entry.mod_rev).max().unwrap_or(0);

        let version_candidates: Vec<VersionCandidate> = candidates
            .iter()
            .map(|c| VersionCandidate {
                version: c.version.clone(),
                service_id: c.entry.service.service_id.clone(),
                create_time: c.entry.service.create_time(),
            })
            .collect();
        let selected = version::resolve(&rule, &version_candidates);
        if selected.is_empty() {
            // No version satisfies the rule: indistinguishable from an
            // unknown service.
            return Err(RegistryError::ServiceNotExists);
        }

        let mut instances = Vec::new();
        for sel in &selected {
            let Some(candidate) = candidates
                .iter()
                .find(|c| c.entry.service.service_id == sel.service_id)
            else {
                continue;
            };
            // Cross-application access requires the provider's consent;
            // a denied provider yields an empty result, not an error.
            if consumer_app != candidate.entry.service.app_id
                && !candidate.entry.service.allow_cross_app()
            {
                continue;
            }
            // Every requested tag must be present on the service.
            if !req
                .tags
                .iter()
                .all(|tag| candidate.entry.service.properties.contains_key(tag))
            {
                continue;
            }
            let entries = self
                .instances_for(
                    scope.no_cache,
                    &candidate.entry.domain,
                    &candidate.entry.project,
                    &sel.service_id,
                )
                .await?;
            for entry in entries {
                max_rev = max_rev.max(entry.mod_rev);
                instances.push(entry.instance);
            }
        }

        let rev = max_rev.to_string();
        if scope.request_rev.as_deref() == Some(rev.as_str()) {
            return Ok(FindOutcome::NotModified { rev });
        }

        if !scope.consumer_id.is_empty() {
            // Best-effort dependency edge; never fails the query.
            let deps = self.deps.clone();
            let (domain, project, consumer_id) = (
                scope.domain.clone(),
                scope.project.clone(),
                scope.consumer_id.clone(),
            );
            let (app, name, rule_str) = (
                req.app_id.clone(),
                req.service_name.clone(),
                req.version_rule.clone(),
            );
            tokio::spawn(async move {
                deps.record(&domain, &project, &consumer_id, &app, &name, &rule_str)
                    .await;
            });
        }

        debug!(
            app_id = %req.app_id,
            service_name = %req.service_name,
            rule = %req.version_rule,
            found = instances.len(),
            %rev,
            "find instances"
        );
        Ok(FindOutcome::Updated { instances, rev })
    }

    /// Direct instance-set lookup by provider service id.
    pub async fn get_instances(
        &self,
        scope: &RequestScope,
        provider_service_id: &str,
    ) -> Result<(Vec<MicroServiceInstance>, String)> {
        let provider = self
            .checked_provider(scope, provider_service_id)
            .await
            .map_err(|err| match err {
                // Never admit the provider exists.
                RegistryError::PermissionDenied(_) => RegistryError::ServiceNotExists,
                other => other,
            })?;
        let entries = self
            .instances_for(scope.no_cache, &provider.domain, &provider.project, provider_service_id)
            .await?;
        let mut max_rev = provider.mod_rev;
        let instances = entries
            .into_iter()
            .map(|e| {
                max_rev = max_rev.max(e.mod_rev);
                e.instance
            })
            .collect();
        Ok((instances, max_rev.to_string()))
    }

    /// Direct single-instance lookup.
    pub async fn get_instance(
        &self,
        scope: &RequestScope,
        provider_service_id: &str,
        provider_instance_id: &str,
    ) -> Result<(MicroServiceInstance, String)> {
        let provider = self
            .checked_provider(scope, provider_service_id)
            .await
            .map_err(|err| match err {
                // A provider the consumer may not see answers the same as
                // a missing instance.
                RegistryError::PermissionDenied(_) => RegistryError::InstanceNotExists,
                other => other,
            })?;
        let entry = self
            .instance_entry(scope, &provider, provider_instance_id)
            .await?
            .ok_or(RegistryError::InstanceNotExists)?;
        let rev = provider.mod_rev.max(entry.mod_rev).to_string();
        Ok((entry.instance, rev))
    }

    /// Each batch item resolves independently with its own revision;
    /// failures are grouped per error and keyed by request index.
    pub async fn batch_find(
        &self,
        scope: &RequestScope,
        request: &BatchFindRequest,
    ) -> Result<(BatchFindResult, BatchFindResult)> {
        let mut services = BatchFindResult::default();
        for (index, item) in request.services.iter().enumerate() {
            let index = index as i64;
            let mut item_scope = scope.clone();
            item_scope.request_rev = if item.rev.is_empty() {
                None
            } else {
                Some(item.rev.clone())
            };
            let req = FindRequest {
                app_id: item.service.app_id.clone(),
                service_name: item.service.service_name.clone(),
                version_rule: item.service.version.clone(),
                environment: if item.service.environment.is_empty() {
                    None
                } else {
                    Some(item.service.environment.clone())
                },
                tags: Vec::new(),
            };
            match self.find_instances(&item_scope, &req).await {
                Ok(FindOutcome::Updated { instances, rev }) => {
                    services.updated.push(FindResult {
                        index,
                        rev,
                        instances,
                    });
                }
                Ok(FindOutcome::NotModified { .. }) => services.not_modified.push(index),
                Err(err) => push_failed(&mut services.failed, index, &err),
            }
        }

        let mut instances = BatchFindResult::default();
        for (index, item) in request.instances.iter().enumerate() {
            let index = index as i64;
            match self
                .get_instance(scope, &item.instance.service_id, &item.instance.instance_id)
                .await
            {
                Ok((instance, rev)) => {
                    if !item.rev.is_empty() && item.rev == rev {
                        instances.not_modified.push(index);
                    } else {
                        instances.updated.push(FindResult {
                            index,
                            rev,
                            instances: vec![instance],
                        });
                    }
                }
                Err(err) => push_failed(&mut instances.failed, index, &err),
            }
        }
        Ok((services, instances))
    }

    /// Looks the provider up in the consumer's tenant and applies the
    /// visibility rules. A denial comes back as `PermissionDenied` for
    /// the caller to translate; it never crosses the API boundary.
    async fn checked_provider(
        &self,
        scope: &RequestScope,
        provider_service_id: &str,
    ) -> Result<ServiceEntry> {
        if scope.consumer_id.is_empty() {
            return Err(RegistryError::ServiceNotExists);
        }
        let consumer = self.service_entry(scope, &scope.consumer_id).await?;
        let provider = self.service_entry(scope, provider_service_id).await?;
        if scope.consumer_id != provider_service_id
            && !self.visible(
                &consumer.service.app_id,
                &consumer.service.environment,
                &provider.service,
            )
        {
            return Err(RegistryError::PermissionDenied(
                "provider is not visible to this consumer".to_string(),
            ));
        }
        Ok(provider)
    }

    fn visible(&self, consumer_app: &str, consumer_env: &str, provider: &MicroService) -> bool {
        let app_ok = consumer_app == provider.app_id || provider.allow_cross_app();
        if self.opts.is_global_visible(&provider.service_name)
            && provider.environment == ENV_PRODUCTION
        {
            return app_ok;
        }
        consumer_env == provider.environment && app_ok
    }

    async fn service_entry(&self, scope: &RequestScope, service_id: &str) -> Result<ServiceEntry> {
        if !scope.no_cache {
            if let Some(entry) = self.cache.get_service(service_id) {
                if entry.domain == scope.domain && entry.project == scope.project {
                    return Ok(entry);
                }
                return Err(RegistryError::ServiceNotExists);
            }
        }
        let key = keys::service_key(&scope.domain, &scope.project, service_id);
        let kv = self
            .store
            .get(&key)
            .await
            .map_err(store_err)?
            .ok_or(RegistryError::ServiceNotExists)?;
        let service = serde_json::from_slice(&kv.value).map_err(RegistryError::internal)?;
        Ok(ServiceEntry {
            service,
            domain: scope.domain.clone(),
            project: scope.project.clone(),
            mod_rev: kv.mod_rev,
        })
    }

    async fn candidates(
        &self,
        no_cache: bool,
        domain: &str,
        project: &str,
        environment: &str,
        app_id: &str,
        service_name: &str,
    ) -> Result<Vec<Candidate>> {
        if !no_cache {
            return Ok(self
                .cache
                .versions_of(domain, project, environment, app_id, service_name)
                .into_iter()
                .filter_map(|(version, service_id)| {
                    self.cache
                        .get_service(&service_id)
                        .map(|entry| Candidate { entry, version })
                })
                .collect());
        }

        let prefix =
            keys::index_versions_prefix(domain, project, environment, app_id, service_name);
        let resp = self.store.range(&prefix).await.map_err(store_err)?;
        let mut out = Vec::with_capacity(resp.kvs.len());
        for kv in resp.kvs {
            let version = kv.key[prefix.len()..].to_string();
            let service_id = String::from_utf8_lossy(&kv.value).to_string();
            let service_key = keys::service_key(domain, project, &service_id);
            if let Some(service_kv) = self.store.get(&service_key).await.map_err(store_err)? {
                if let Ok(service) = serde_json::from_slice::<MicroService>(&service_kv.value) {
                    out.push(Candidate {
                        entry: ServiceEntry {
                            service,
                            domain: domain.to_string(),
                            project: project.to_string(),
                            mod_rev: service_kv.mod_rev,
                        },
                        version,
                    });
                }
            }
        }
        Ok(out)
    }

    async fn instances_for(
        &self,
        no_cache: bool,
        domain: &str,
        project: &str,
        service_id: &str,
    ) -> Result<Vec<InstanceEntry>> {
        if !no_cache {
            return Ok(self.cache.instances_of(service_id));
        }
        let prefix = keys::instance_prefix(domain, project, service_id);
        let resp = self.store.range(&prefix).await.map_err(store_err)?;
        let mut entries: Vec<InstanceEntry> = resp
            .kvs
            .into_iter()
            .filter_map(|kv| {
                serde_json::from_slice::<MicroServiceInstance>(&kv.value)
                    .ok()
                    .map(|instance| InstanceEntry {
                        instance,
                        domain: domain.to_string(),
                        project: project.to_string(),
                        mod_rev: kv.mod_rev,
                    })
            })
            .collect();
        entries.sort_by(|a, b| a.instance.instance_id.cmp(&b.instance.instance_id));
        Ok(entries)
    }

    async fn instance_entry(
        &self,
        scope: &RequestScope,
        provider: &ServiceEntry,
        instance_id: &str,
    ) -> Result<Option<InstanceEntry>> {
        if !scope.no_cache {
            return Ok(self
                .cache
                .get_instance(&provider.service.service_id, instance_id));
        }
        let key = keys::instance_key(
            &provider.domain,
            &provider.project,
            &provider.service.service_id,
            instance_id,
        );
        match self.store.get(&key).await.map_err(store_err)? {
            Some(kv) => {
                let instance = serde_json::from_slice(&kv.value).map_err(RegistryError::internal)?;
                Ok(Some(InstanceEntry {
                    instance,
                    domain: provider.domain.clone(),
                    project: provider.project.clone(),
                    mod_rev: kv.mod_rev,
                }))
            }
            None => Ok(None),
        }
    }
}

fn push_failed(failed: &mut Vec<FindFailedResult>, index: i64, err: &RegistryError) {
    if let Some(group) = failed.iter_mut().find(|g| g.error.code == err.code()) {
        group.indexes.push(index);
    } else {
        failed.push(FindFailedResult {
            indexes: vec![index],
            error: err.into(),
        });
    }
}

// Integration tests for the discovery data plane
// Exercises registration, version-rule resolution, visibility, revision
// short-circuiting, batch queries, lease expiry and the janitor against an
// isolated in-process registry graph.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use farol_api::discovery::model::{
    BatchFindRequest, FindInstance, FindService, FindServiceKey, HeartbeatElement,
};
use farol_api::model::{ENV_PRODUCTION, PROP_ALLOW_CROSS_APP};
use farol_api::registry::model::{
    HealthCheck, MicroService, MicroServiceInstance, ServiceStatus,
};
use farol_common::error::RegistryError;
use farol_registry::{
    FindOutcome, FindRequest, LeaseOptions, Registry, RegistryOptions, RequestScope,
};
use farol_store::{KvStore, MemoryStore};

const DOMAIN: &str = "default";
const PROJECT: &str = "default";

fn test_options() -> RegistryOptions {
    RegistryOptions {
        service_clear_enabled: false,
        ..Default::default()
    }
}

async fn test_registry(opts: RegistryOptions) -> Registry {
    let store = Arc::new(MemoryStore::new()) as Arc<dyn KvStore>;
    let registry = Registry::with_lease_options(
        store,
        opts,
        LeaseOptions {
            default_ttl: Duration::ZERO,
            min_ttl: Duration::from_secs(1),
            max_ttl: Duration::from_secs(3600),
        },
    );
    registry.start().await.unwrap();
    registry
}

/// Blocks until the cache has applied every write under the prefixes it
/// watches (lease and dependency keys are not indexed).
async fn sync(registry: &Registry) {
    let mut target = 0i64;
    for prefix in ["sr/ms/", "sr/inst/", "sr/index/"] {
        let resp = registry.store.range(prefix).await.unwrap();
        if let Some(max) = resp.kvs.iter().map(|kv| kv.mod_rev).max() {
            target = target.max(max);
        }
    }
    for _ in 0..500 {
        if registry.cache.highest_rev() >= target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("cache failed to catch up to rev {}", target);
}

/// Polls a condition that becomes true once the cache applies a pending
/// deletion.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached before timeout");
}

fn service(app: &str, name: &str, version: &str) -> MicroService {
    MicroService {
        app_id: app.to_string(),
        service_name: name.to_string(),
        version: version.to_string(),
        level: "FRONT".to_string(),
        status: ServiceStatus::Up,
        ..Default::default()
    }
}

fn instance(service_id: &str, endpoint: &str) -> MicroServiceInstance {
    MicroServiceInstance {
        service_id: service_id.to_string(),
        host_name: "UT-HOST".to_string(),
        endpoints: vec![endpoint.to_string()],
        ..Default::default()
    }
}

async fn register_service(registry: &Registry, svc: MicroService) -> String {
    let id = registry
        .service
        .register_service(DOMAIN, PROJECT, svc)
        .await
        .unwrap();
    sync(registry).await;
    id
}

async fn register_instance(registry: &Registry, service_id: &str, endpoint: &str) -> String {
    let id = registry
        .service
        .register_instance(DOMAIN, PROJECT, instance(service_id, endpoint))
        .await
        .unwrap();
    sync(registry).await;
    id
}

fn scope(consumer_id: &str) -> RequestScope {
    RequestScope::new(DOMAIN, PROJECT).with_consumer(consumer_id)
}

fn find(app: &str, name: &str, rule: &str) -> FindRequest {
    FindRequest {
        app_id: app.to_string(),
        service_name: name.to_string(),
        version_rule: rule.to_string(),
        environment: None,
        tags: Vec::new(),
    }
}

fn instance_ids(outcome: &FindOutcome) -> Vec<String> {
    outcome
        .instances()
        .iter()
        .map(|i| i.instance_id.clone())
        .collect()
}

#[tokio::test]
async fn test_register_and_find_with_version_rules() {
    let registry = test_registry(test_options()).await;
    let sid1 = register_service(&registry, service("A", "svc", "1.0.0")).await;
    let sid2 = register_service(&registry, service("A", "svc", "1.0.5")).await;
    let iid1 = register_instance(&registry, &sid1, "rest:127.0.0.1:8080").await;
    let iid2 = register_instance(&registry, &sid2, "rest:127.0.0.2:8080").await;

    let outcome = registry
        .discovery
        .find_instances(&scope(&sid1), &find("A", "svc", "latest"))
        .await
        .unwrap();
    assert_eq!(instance_ids(&outcome), vec![iid2.clone()]);

    let outcome = registry
        .discovery
        .find_instances(&scope(&sid1), &find("A", "svc", "1.0.0+"))
        .await
        .unwrap();
    assert_eq!(instance_ids(&outcome), vec![iid2.clone(), iid1.clone()]);

    let outcome = registry
        .discovery
        .find_instances(&scope(&sid1), &find("A", "svc", "1.0.0"))
        .await
        .unwrap();
    assert_eq!(instance_ids(&outcome), vec![iid1.clone()]);

    let err = registry
        .discovery
        .find_instances(&scope(&sid1), &find("A", "svc", "0.0.0"))
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::ServiceNotExists);

    registry.stop();
}

#[tokio::test]
async fn test_cross_app_visibility() {
    let registry = test_registry(test_options()).await;
    let provider = register_service(&registry, service("A", "svc", "1.0.5")).await;
    let consumer = register_service(&registry, service("B", "consumer", "1.0.0")).await;
    let iid = register_instance(&registry, &provider, "rest:127.0.0.1:8080").await;

    // Different app without consent: success with zero instances.
    let outcome = registry
        .discovery
        .find_instances(&scope(&consumer), &find("A", "svc", "1.0.5"))
        .await
        .unwrap();
    assert!(outcome.instances().is_empty());

    // Provider opts in; the same query now returns the instance.
    let mut properties = HashMap::new();
    properties.insert(PROP_ALLOW_CROSS_APP.to_string(), "true".to_string());
    registry
        .service
        .update_service_properties(DOMAIN, PROJECT, &provider, properties)
        .await
        .unwrap();
    sync(&registry).await;

    let outcome = registry
        .discovery
        .find_instances(&scope(&consumer), &find("A", "svc", "1.0.5"))
        .await
        .unwrap();
    assert_eq!(instance_ids(&outcome), vec![iid]);

    registry.stop();
}

#[tokio::test]
async fn test_missing_tag_yields_empty_success() {
    let registry = test_registry(test_options()).await;
    let sid = register_service(&registry, service("A", "svc", "1.0.0")).await;
    register_instance(&registry, &sid, "rest:127.0.0.1:8080").await;

    let mut req = find("A", "svc", "latest");
    req.tags = vec!["not_exist_tag".to_string()];
    let outcome = registry
        .discovery
        .find_instances(&scope(&sid), &req)
        .await
        .unwrap();
    assert!(outcome.is_modified());
    assert!(outcome.instances().is_empty());

    registry.stop();
}

#[tokio::test]
async fn test_revision_short_circuit() {
    let registry = test_registry(test_options()).await;
    let sid = register_service(&registry, service("A", "svc", "1.0.0")).await;
    register_instance(&registry, &sid, "rest:127.0.0.1:8080").await;

    let first = registry
        .discovery
        .find_instances(&scope(&sid), &find("A", "svc", "latest"))
        .await
        .unwrap();
    assert!(first.is_modified());
    let rev = first.rev().to_string();

    // Unchanged state: same revision, not modified.
    let second = registry
        .discovery
        .find_instances(
            &scope(&sid).with_request_rev(&rev),
            &find("A", "svc", "latest"),
        )
        .await
        .unwrap();
    assert!(!second.is_modified());
    assert_eq!(second.rev(), rev);

    // A new instance moves the revision forward again.
    register_instance(&registry, &sid, "rest:127.0.0.2:8080").await;
    let third = registry
        .discovery
        .find_instances(
            &scope(&sid).with_request_rev(&rev),
            &find("A", "svc", "latest"),
        )
        .await
        .unwrap();
    assert!(third.is_modified());
    assert_eq!(third.instances().len(), 2);
    assert!(third.rev().parse::<i64>().unwrap() > rev.parse::<i64>().unwrap());

    registry.stop();
}

#[tokio::test]
async fn test_revision_deterministic_without_changes() {
    let registry = test_registry(test_options()).await;
    let sid = register_service(&registry, service("A", "svc", "1.0.0")).await;
    register_instance(&registry, &sid, "rest:127.0.0.1:8080").await;

    let a = registry
        .discovery
        .find_instances(&scope(&sid), &find("A", "svc", "latest"))
        .await
        .unwrap();
    let b = registry
        .discovery
        .find_instances(&scope(&sid), &find("A", "svc", "latest"))
        .await
        .unwrap();
    assert_eq!(a.rev(), b.rev());

    registry.stop();
}

#[tokio::test]
async fn test_nocache_revision_is_comparable() {
    let registry = test_registry(test_options()).await;
    let sid = register_service(&registry, service("A", "svc", "1.0.0")).await;
    register_instance(&registry, &sid, "rest:127.0.0.1:8080").await;

    let cached = registry
        .discovery
        .find_instances(&scope(&sid), &find("A", "svc", "latest"))
        .await
        .unwrap();
    let mut nocache_scope = scope(&sid);
    nocache_scope.no_cache = true;
    let direct = registry
        .discovery
        .find_instances(&nocache_scope, &find("A", "svc", "latest"))
        .await
        .unwrap();
    assert_eq!(cached.rev(), direct.rev());

    registry.stop();
}

#[tokio::test]
async fn test_batch_find_classifies_items() {
    let registry = test_registry(test_options()).await;
    let sid = register_service(&registry, service("A", "svc", "1.0.5")).await;
    let iid = register_instance(&registry, &sid, "rest:127.0.0.1:8080").await;

    let item = |rule: &str| FindService {
        service: FindServiceKey {
            app_id: "A".to_string(),
            service_name: "svc".to_string(),
            version: rule.to_string(),
            environment: String::new(),
        },
        rev: String::new(),
    };
    let request = BatchFindRequest {
        services: vec![item("latest"), item("1.0.0+"), item("0.0.0")],
        instances: vec![FindInstance {
            instance: HeartbeatElement {
                service_id: sid.clone(),
                instance_id: iid.clone(),
            },
            rev: String::new(),
        }],
    };
    let (services, instances) = registry
        .discovery
        .batch_find(&scope(&sid), &request)
        .await
        .unwrap();

    assert_eq!(services.updated.len(), 2);
    assert_eq!(services.updated[0].index, 0);
    assert_eq!(services.updated[0].instances[0].instance_id, iid);
    assert_eq!(services.updated[1].index, 1);
    assert_eq!(services.failed.len(), 1);
    assert_eq!(services.failed[0].indexes, vec![2]);
    assert_eq!(
        services.failed[0].error.code,
        RegistryError::ServiceNotExists.code()
    );

    assert_eq!(instances.updated.len(), 1);
    let inst_rev = instances.updated[0].rev.clone();

    // Re-query with the returned revisions: everything collapses to
    // not-modified.
    let request = BatchFindRequest {
        services: vec![FindService {
            rev: services.updated[0].rev.clone(),
            ..item("latest")
        }],
        instances: vec![FindInstance {
            instance: HeartbeatElement {
                service_id: sid.clone(),
                instance_id: iid.clone(),
            },
            rev: inst_rev,
        }],
    };
    let (services, instances) = registry
        .discovery
        .batch_find(&scope(&sid), &request)
        .await
        .unwrap();
    assert_eq!(services.not_modified, vec![0]);
    assert_eq!(instances.not_modified, vec![0]);

    registry.stop();
}

#[tokio::test]
async fn test_idempotent_instance_registration() {
    let registry = test_registry(test_options()).await;
    let sid = register_service(&registry, service("A", "svc", "1.0.0")).await;

    let first = register_instance(&registry, &sid, "rest:127.0.0.1:8080").await;
    let second = register_instance(&registry, &sid, "rest:127.0.0.1:8080").await;
    assert_eq!(first, second);
    assert_eq!(registry.cache.instance_count(&sid), 1);

    // A client-supplied id is honored.
    let mut custom = instance(&sid, "rest:127.0.0.9:8080");
    custom.instance_id = "custom-id".to_string();
    let id = registry
        .service
        .register_instance(DOMAIN, PROJECT, custom)
        .await
        .unwrap();
    assert_eq!(id, "custom-id");

    registry.stop();
}

#[tokio::test]
async fn test_heartbeat_requires_existing_lease() {
    let registry = test_registry(test_options()).await;
    let sid = register_service(&registry, service("A", "svc", "1.0.0")).await;
    let iid = register_instance(&registry, &sid, "rest:127.0.0.1:8080").await;

    assert!(registry
        .service
        .heartbeat(DOMAIN, PROJECT, &sid, &iid)
        .await
        .is_ok());
    assert_eq!(
        registry
            .service
            .heartbeat(DOMAIN, PROJECT, &sid, "not-exist")
            .await
            .unwrap_err(),
        RegistryError::InstanceNotExists
    );
    assert_eq!(
        registry
            .service
            .heartbeat(DOMAIN, PROJECT, "not-exist", &iid)
            .await
            .unwrap_err(),
        RegistryError::ServiceNotExists
    );

    // Batch: one failing element does not abort the batch.
    let results = registry
        .service
        .heartbeat_set(
            DOMAIN,
            PROJECT,
            &[
                HeartbeatElement {
                    service_id: sid.clone(),
                    instance_id: iid.clone(),
                },
                HeartbeatElement {
                    service_id: sid.clone(),
                    instance_id: "not-exist".to_string(),
                },
            ],
        )
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].error_code, 0);
    assert_ne!(results[1].error_code, 0);

    registry.stop();
}

#[tokio::test]
async fn test_lease_expiry_removes_instance_from_discovery() {
    let registry = test_registry(test_options()).await;
    let sid = register_service(&registry, service("A", "svc", "1.0.0")).await;

    let mut inst = instance(&sid, "rest:127.0.0.1:8080");
    inst.health_check = Some(HealthCheck {
        mode: "push".to_string(),
        interval: 1,
        times: 0,
    });
    let iid = registry
        .service
        .register_instance(DOMAIN, PROJECT, inst)
        .await
        .unwrap();
    sync(&registry).await;

    let (instances, _) = registry
        .discovery
        .get_instances(&scope(&sid), &sid)
        .await
        .unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].instance_id, iid);

    // No heartbeat: after ttl + grace the instance is gone everywhere.
    let mut gone = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        sync(&registry).await;
        let (instances, _) = registry
            .discovery
            .get_instances(&scope(&sid), &sid)
            .await
            .unwrap();
        if instances.is_empty() {
            gone = true;
            break;
        }
    }
    assert!(gone, "expired instance still discoverable");

    registry.stop();
}

#[tokio::test]
async fn test_global_visibility_requires_export_and_production() {
    let mut opts = test_options();
    opts.global_visible = HashSet::from(["shared-svc".to_string()]);
    let registry = test_registry(opts).await;

    // Providers in the default tenant: one production, one not.
    let mut exported = service("default", "shared-svc", "1.0.0");
    exported.environment = ENV_PRODUCTION.to_string();
    let shared_sid = register_service(&registry, exported).await;
    let shared_iid = register_instance(&registry, &shared_sid, "rest:127.0.0.5:8080").await;
    let private_sid = register_service(&registry, service("default", "private-svc", "1.0.0")).await;
    register_instance(&registry, &private_sid, "rest:127.0.0.6:8080").await;

    // Consumer in a foreign tenant.
    let consumer_id = registry
        .service
        .register_service("user", "user", service("default", "consumer", "1.0.0"))
        .await
        .unwrap();
    sync(&registry).await;
    let foreign_scope = RequestScope::new("user", "user").with_consumer(&consumer_id);

    // Exported production service resolves across tenants.
    let outcome = registry
        .discovery
        .find_instances(&foreign_scope, &find("default", "shared-svc", "1.0.0"))
        .await
        .unwrap();
    assert_eq!(instance_ids(&outcome), vec![shared_iid]);

    // A service outside the global-visible set does not.
    let err = registry
        .discovery
        .find_instances(&foreign_scope, &find("default", "private-svc", "1.0.0"))
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::ServiceNotExists);

    // Direct lookups stay tenant-scoped even for exported services.
    let err = registry
        .discovery
        .get_instances(&foreign_scope, &shared_sid)
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::ServiceNotExists);

    registry.stop();
}

#[tokio::test]
async fn test_direct_lookup_visibility() {
    let registry = test_registry(test_options()).await;
    let provider = register_service(&registry, service("A", "svc", "1.0.5")).await;
    let iid = register_instance(&registry, &provider, "rest:127.0.0.2:8080").await;
    let same_app = register_service(&registry, service("A", "peer", "1.0.0")).await;
    let cross_app = register_service(&registry, service("B", "other", "1.0.0")).await;

    // Same app sees the provider.
    let (instances, _) = registry
        .discovery
        .get_instances(&scope(&same_app), &provider)
        .await
        .unwrap();
    assert_eq!(instances.len(), 1);

    // A service always sees itself.
    let (inst, _) = registry
        .discovery
        .get_instance(&scope(&provider), &provider, &iid)
        .await
        .unwrap();
    assert_eq!(inst.instance_id, iid);

    // Cross-app without consent is indistinguishable from absence.
    let err = registry
        .discovery
        .get_instance(&scope(&cross_app), &provider, &iid)
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::InstanceNotExists);
    let err = registry
        .discovery
        .get_instances(&scope(&cross_app), &provider)
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::ServiceNotExists);

    // Unknown consumer is rejected.
    let err = registry
        .discovery
        .get_instances(&scope("not-exist"), &provider)
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::ServiceNotExists);

    registry.stop();
}

#[tokio::test]
async fn test_unregister_service_refuses_live_instances() {
    let registry = test_registry(test_options()).await;
    let sid = register_service(&registry, service("A", "svc", "1.0.0")).await;
    register_instance(&registry, &sid, "rest:127.0.0.1:8080").await;

    let err = registry
        .service
        .unregister_service(DOMAIN, PROJECT, &sid, false)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Conflict(_)));

    registry
        .service
        .unregister_service(DOMAIN, PROJECT, &sid, true)
        .await
        .unwrap();
    wait_until(|| registry.cache.get_service(&sid).is_none()).await;
    assert_eq!(registry.cache.instance_count(&sid), 0);

    registry.stop();
}

#[tokio::test]
async fn test_janitor_removes_only_aged_empty_services() {
    let mut opts = test_options();
    opts.service_ttl = Duration::ZERO;
    let registry = test_registry(opts).await;

    let empty_sid = register_service(&registry, service("A", "stale-svc", "1.0.0")).await;
    let live_sid = register_service(&registry, service("A", "live-svc", "1.0.0")).await;
    register_instance(&registry, &live_sid, "rest:127.0.0.1:8080").await;

    // Make the empty service look old enough.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let removed = registry.janitor.run_sweep().await;
    assert_eq!(removed, 1);
    wait_until(|| registry.cache.get_service(&empty_sid).is_none()).await;
    assert!(registry.cache.get_service(&live_sid).is_some());

    registry.stop();
}

#[tokio::test]
async fn test_event_fanout_on_registration() {
    let registry = test_registry(test_options()).await;
    let sid = register_service(&registry, service("A", "svc", "1.0.0")).await;

    let mut sub = registry.bus.subscribe(farol_registry::SubscribeFilter {
        domain: DOMAIN.to_string(),
        project: PROJECT.to_string(),
        consumer_service_id: None,
        provider: Some(("A".to_string(), "svc".to_string())),
    });

    register_instance(&registry, &sid, "rest:127.0.0.1:8080").await;

    let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("no event before timeout")
        .expect("bus closed");
    assert_eq!(event.action, farol_registry::ChangeAction::Create);
    let instance = event.instance.expect("instance payload");
    assert_eq!(instance.service_id, sid);
    assert!(event.rev > 0);

    registry.stop();
}

//! Farol Registry - Discovery data plane
//!
//! This crate provides:
//! - Watch-fed cache indexes over the store (`cache`)
//! - The per-instance lease state machine (`lease`)
//! - Version rule resolution (`version`)
//! - The find-instances query engine (`discovery`)
//! - Consumer/provider dependency tracking (`dependency`)
//! - Change-event fanout to subscribers (`notify`)
//! - Periodic cleanup of abandoned services (`janitor`)
//! - The registration write path (`service`)

pub mod cache;
pub mod dependency;
pub mod discovery;
pub mod janitor;
pub mod lease;
pub mod notify;
pub mod options;
pub mod service;
pub mod version;

use std::sync::Arc;

use farol_store::{KvStore, StoreResult};

pub use cache::CacheManager;
pub use dependency::DependencyTracker;
pub use discovery::{DiscoveryEngine, FindOutcome, FindRequest, RequestScope};
pub use janitor::Janitor;
pub use lease::{ExpiryLedger, LeaseManager, LeaseOptions};
pub use notify::{ChangeAction, EventBus, NotifyEvent, SubscribeFilter, Subscription};
pub use options::RegistryOptions;
pub use service::RegistryService;

/// The assembled registry graph. Construction wires every component
/// explicitly; tests build isolated graphs the same way the binary does.
pub struct Registry {
    pub store: Arc<dyn KvStore>,
    pub bus: Arc<EventBus>,
    pub cache: CacheManager,
    pub leases: LeaseManager,
    pub deps: DependencyTracker,
    pub service: RegistryService,
    pub discovery: DiscoveryEngine,
    pub janitor: Janitor,
    pub opts: RegistryOptions,
}

impl Registry {
    pub fn new(store: Arc<dyn KvStore>, opts: RegistryOptions) -> Self {
        Self::with_lease_options(
            store,
            opts.clone(),
            LeaseOptions {
                default_ttl: opts.instance_ttl,
                min_ttl: opts.min_lease_ttl,
                max_ttl: opts.max_lease_ttl,
            },
        )
    }

    pub fn with_lease_options(
        store: Arc<dyn KvStore>,
        opts: RegistryOptions,
        lease_opts: LeaseOptions,
    ) -> Self {
        let deps = DependencyTracker::new(store.clone());
        let bus = Arc::new(EventBus::new(deps.clone()));
        let ledger = Arc::new(ExpiryLedger::new());
        let cache = CacheManager::new(store.clone(), bus.clone(), ledger.clone(), opts.cache_ttl);
        let leases = LeaseManager::new(store.clone(), ledger, lease_opts);
        let service = RegistryService::new(
            store.clone(),
            cache.clone(),
            leases.clone(),
            deps.clone(),
        );
        let discovery =
            DiscoveryEngine::new(store.clone(), cache.clone(), deps.clone(), opts.clone());
        let janitor = Janitor::new(store.clone(), cache.clone(), opts.clone());
        Registry {
            store,
            bus,
            cache,
            leases,
            deps,
            service,
            discovery,
            janitor,
            opts,
        }
    }

    /// Bootstraps the caches and spawns the long-running loops: cache
    /// watchers, lease dispatcher and (when enabled) the janitor.
    pub async fn start(&self) -> StoreResult<()> {
        self.deps.bootstrap().await?;
        self.cache.bootstrap().await?;
        self.cache.start();
        let leases = self.leases.clone();
        tokio::spawn(async move { leases.start().await });
        if self.opts.service_clear_enabled {
            let janitor = self.janitor.clone();
            tokio::spawn(async move { janitor.start().await });
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.janitor.stop();
        self.leases.stop();
        self.cache.stop();
    }
}

//! Registry tuning options
//!
//! Defaults mirror the configuration table: janitor every 12 hours with a
//! 24 hour no-instance TTL, lease TTLs clamped to [30 s, 1 h], cache
//! refresh backstop no lower than 5 minutes.

use std::collections::HashSet;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RegistryOptions {
    /// Tenant that hosts globally visible services.
    pub default_domain: String,
    pub default_project: String,
    /// Service names exported to every tenant (production only).
    pub global_visible: HashSet<String>,
    /// Default lease TTL when neither the instance nor the service
    /// declares one; zero means unset.
    pub instance_ttl: Duration,
    pub min_lease_ttl: Duration,
    pub max_lease_ttl: Duration,
    /// Janitor settings.
    pub service_clear_enabled: bool,
    pub service_clear_interval: Duration,
    pub service_ttl: Duration,
    /// Periodic full cache refresh backstop.
    pub cache_ttl: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            default_domain: farol_api::model::DEFAULT_DOMAIN.to_string(),
            default_project: farol_api::model::DEFAULT_PROJECT.to_string(),
            global_visible: HashSet::new(),
            instance_ttl: Duration::ZERO,
            min_lease_ttl: Duration::from_secs(30),
            max_lease_ttl: Duration::from_secs(3600),
            service_clear_enabled: false,
            service_clear_interval: Duration::from_secs(12 * 3600),
            service_ttl: Duration::from_secs(24 * 3600),
            cache_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl RegistryOptions {
    pub fn is_global_visible(&self, service_name: &str) -> bool {
        self.global_visible.contains(service_name)
    }
}

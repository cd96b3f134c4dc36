//! Server configuration
//!
//! Settings are read from the environment over built-in defaults. Values
//! outside their legal window fall back to the default rather than being
//! clamped, matching the documented variable semantics:
//!
//! | Variable | Effect |
//! |---|---|
//! | `SERVICE_CLEAR_ENABLED` | enables the janitor |
//! | `SERVICE_CLEAR_INTERVAL` | janitor period, 30 s ..= 24 h |
//! | `SERVICE_TTL` | minimum no-instance age before deletion, 30 s ..= 1 y |
//! | `INSTANCE_TTL` | default lease TTL in seconds |
//! | `CACHE_TTL` | cache refresh backstop, at least 5 min |
//! | `CSE_SHARED_SERVICES` | comma list of globally visible service names |
//! | `SCHEMA_EDITABLE` | whether schemas may be mutated after registration |
//! | `FAROL_HTTP_HOST` / `FAROL_HTTP_PORT` | REST bind address |

use std::collections::HashSet;
use std::time::Duration;

use config::Config;
use farol_common::utils::parse_duration;
use farol_registry::RegistryOptions;

const DEFAULT_SERVICE_CLEAR_INTERVAL: Duration = Duration::from_secs(12 * 3600);
const MIN_SERVICE_CLEAR_INTERVAL: Duration = Duration::from_secs(30);
const MAX_SERVICE_CLEAR_INTERVAL: Duration = Duration::from_secs(24 * 3600);

const DEFAULT_SERVICE_TTL: Duration = Duration::from_secs(24 * 3600);
const MIN_SERVICE_TTL: Duration = Duration::from_secs(30);
const MAX_SERVICE_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

const MIN_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

pub struct Configuration {
    raw: Config,
}

impl Configuration {
    pub fn new() -> anyhow::Result<Self> {
        let raw = Config::builder()
            .set_default("service_clear_enabled", false)?
            .set_default("service_clear_interval", "12h")?
            .set_default("service_ttl", "24h")?
            .set_default("instance_ttl", 0i64)?
            .set_default("cache_ttl", "5m")?
            .set_default("cse_shared_services", "")?
            .set_default("schema_editable", true)?
            .set_default("farol_http_host", "0.0.0.0")?
            .set_default("farol_http_port", 30100i64)?
            .add_source(config::Environment::default())
            .build()?;
        Ok(Configuration { raw })
    }

    fn duration(&self, key: &str, default: Duration) -> Duration {
        self.raw
            .get_string(key)
            .ok()
            .and_then(|s| parse_duration(&s))
            .unwrap_or(default)
    }

    /// Out-of-window values revert to the default.
    fn windowed(&self, key: &str, default: Duration, min: Duration, max: Duration) -> Duration {
        let value = self.duration(key, default);
        if value < min || value > max {
            default
        } else {
            value
        }
    }

    pub fn service_clear_enabled(&self) -> bool {
        self.raw.get_bool("service_clear_enabled").unwrap_or(false)
    }

    pub fn service_clear_interval(&self) -> Duration {
        self.windowed(
            "service_clear_interval",
            DEFAULT_SERVICE_CLEAR_INTERVAL,
            MIN_SERVICE_CLEAR_INTERVAL,
            MAX_SERVICE_CLEAR_INTERVAL,
        )
    }

    pub fn service_ttl(&self) -> Duration {
        self.windowed(
            "service_ttl",
            DEFAULT_SERVICE_TTL,
            MIN_SERVICE_TTL,
            MAX_SERVICE_TTL,
        )
    }

    pub fn instance_ttl(&self) -> Duration {
        let secs = self.raw.get_int("instance_ttl").unwrap_or(0);
        if secs > 0 {
            Duration::from_secs(secs as u64)
        } else {
            Duration::ZERO
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        self.duration("cache_ttl", MIN_CACHE_TTL).max(MIN_CACHE_TTL)
    }

    pub fn global_visible(&self) -> HashSet<String> {
        self.raw
            .get_string("cse_shared_services")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn schema_editable(&self) -> bool {
        self.raw.get_bool("schema_editable").unwrap_or(true)
    }

    pub fn http_host(&self) -> String {
        self.raw
            .get_string("farol_http_host")
            .unwrap_or_else(|_| "0.0.0.0".to_string())
    }

    pub fn http_port(&self) -> u16 {
        self.raw.get_int("farol_http_port").unwrap_or(30100) as u16
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            global_visible: self.global_visible(),
            instance_ttl: self.instance_ttl(),
            service_clear_enabled: self.service_clear_enabled(),
            service_clear_interval: self.service_clear_interval(),
            service_ttl: self.service_ttl(),
            cache_ttl: self.cache_ttl(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(overrides: &[(&str, &str)]) -> Configuration {
        let mut builder = Config::builder()
            .set_default("service_clear_enabled", false)
            .unwrap()
            .set_default("service_clear_interval", "12h")
            .unwrap()
            .set_default("service_ttl", "24h")
            .unwrap()
            .set_default("instance_ttl", 0i64)
            .unwrap()
            .set_default("cache_ttl", "5m")
            .unwrap()
            .set_default("cse_shared_services", "")
            .unwrap()
            .set_default("schema_editable", true)
            .unwrap()
            .set_default("farol_http_host", "0.0.0.0")
            .unwrap()
            .set_default("farol_http_port", 30100i64)
            .unwrap();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).unwrap();
        }
        Configuration {
            raw: builder.build().unwrap(),
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = config_with(&[]);
        assert!(!cfg.service_clear_enabled());
        assert_eq!(cfg.service_clear_interval(), Duration::from_secs(12 * 3600));
        assert_eq!(cfg.service_ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(cfg.instance_ttl(), Duration::ZERO);
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(300));
        assert!(cfg.global_visible().is_empty());
        assert!(cfg.schema_editable());
        assert_eq!(cfg.http_port(), 30100);
    }

    #[test]
    fn test_out_of_window_interval_reverts_to_default() {
        let cfg = config_with(&[("service_clear_interval", "5s")]);
        assert_eq!(cfg.service_clear_interval(), Duration::from_secs(12 * 3600));

        let cfg = config_with(&[("service_clear_interval", "48h")]);
        assert_eq!(cfg.service_clear_interval(), Duration::from_secs(12 * 3600));

        let cfg = config_with(&[("service_clear_interval", "10m")]);
        assert_eq!(cfg.service_clear_interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_cache_ttl_floor() {
        let cfg = config_with(&[("cache_ttl", "30s")]);
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(300));

        let cfg = config_with(&[("cache_ttl", "10m")]);
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_shared_services_list() {
        let cfg = config_with(&[("cse_shared_services", "svc-a, svc-b,,svc-c")]);
        let set = cfg.global_visible();
        assert_eq!(set.len(), 3);
        assert!(set.contains("svc-a"));
        assert!(set.contains("svc-b"));
        assert!(set.contains("svc-c"));
    }

    #[test]
    fn test_registry_options_projection() {
        let cfg = config_with(&[
            ("service_clear_enabled", "true"),
            ("instance_ttl", "90"),
            ("cse_shared_services", "shared"),
        ]);
        let opts = cfg.registry_options();
        assert!(opts.service_clear_enabled);
        assert_eq!(opts.instance_ttl, Duration::from_secs(90));
        assert!(opts.is_global_visible("shared"));
    }
}

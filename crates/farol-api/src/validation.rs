//! Input validation for registry requests
//!
//! Validation failures are returned as `InvalidParameter` before any state
//! is touched.

use std::sync::LazyLock;

use farol_common::error::RegistryError;
use regex::Regex;

use crate::registry::model::{MicroService, MicroServiceInstance};

/// Maximum length for service and app names
pub const MAX_NAME_LENGTH: usize = 128;

/// Maximum length for a domain or project name
pub const MAX_TENANT_LENGTH: usize = 256;

/// Maximum number of properties on a service or instance
pub const MAX_PROPERTIES: usize = 1000;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("Invalid name pattern")
});

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+){0,2}$").expect("Invalid version pattern"));

static VERSION_RULE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(latest|\d+(\.\d+){0,2}\+?|\d+(\.\d+){0,2}-\d+(\.\d+){0,2})$")
        .expect("Invalid version rule pattern")
});

fn check_name(field: &str, value: &str) -> Result<(), RegistryError> {
    if value.is_empty() {
        return Err(RegistryError::InvalidParameter(format!(
            "{} is missing",
            field
        )));
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(RegistryError::InvalidParameter(format!(
            "{} is too long",
            field
        )));
    }
    if !NAME_PATTERN.is_match(value) {
        return Err(RegistryError::InvalidParameter(format!(
            "{} contains illegal characters",
            field
        )));
    }
    Ok(())
}

/// Validate a concrete version string ("x", "x.y" or "x.y.z").
pub fn validate_version(version: &str) -> Result<(), RegistryError> {
    if version.is_empty() || !VERSION_PATTERN.is_match(version) {
        return Err(RegistryError::InvalidParameter(format!(
            "version '{}' is invalid",
            version
        )));
    }
    Ok(())
}

/// Validate a version rule (exact, "x.y.z+", "x.y.z-a.b.c" or "latest");
/// the empty rule means "latest" and is accepted.
pub fn validate_version_rule(rule: &str) -> Result<(), RegistryError> {
    if rule.is_empty() {
        return Ok(());
    }
    if !VERSION_RULE_PATTERN.is_match(rule) {
        return Err(RegistryError::InvalidParameter(format!(
            "version rule '{}' is invalid",
            rule
        )));
    }
    Ok(())
}

/// Validate a tenant component (domain or project).
pub fn validate_tenant(field: &str, value: &str) -> Result<(), RegistryError> {
    if value.is_empty() || value.len() > MAX_TENANT_LENGTH {
        return Err(RegistryError::InvalidParameter(format!(
            "{} is invalid",
            field
        )));
    }
    Ok(())
}

/// Validate a new microservice registration.
pub fn validate_service(service: &MicroService) -> Result<(), RegistryError> {
    check_name("serviceName", &service.service_name)?;
    check_name("appId", &service.app_id)?;
    validate_version(&service.version)?;
    if service.properties.len() > MAX_PROPERTIES {
        return Err(RegistryError::InvalidParameter(
            "too many properties".to_string(),
        ));
    }
    Ok(())
}

/// Validate a new instance registration.
pub fn validate_instance(instance: &MicroServiceInstance) -> Result<(), RegistryError> {
    if instance.service_id.is_empty() {
        return Err(RegistryError::InvalidParameter(
            "serviceId is missing".to_string(),
        ));
    }
    if instance.host_name.is_empty() {
        return Err(RegistryError::InvalidParameter(
            "hostName is missing".to_string(),
        ));
    }
    if instance.endpoints.is_empty() {
        return Err(RegistryError::InvalidParameter(
            "endpoints are missing".to_string(),
        ));
    }
    if let Some(hc) = &instance.health_check {
        if hc.interval <= 0 || hc.times < 0 {
            return Err(RegistryError::InvalidParameter(
                "healthCheck interval/times are invalid".to_string(),
            ));
        }
    }
    if instance.properties.len() > MAX_PROPERTIES {
        return Err(RegistryError::InvalidParameter(
            "too many properties".to_string(),
        ));
    }
    Ok(())
}

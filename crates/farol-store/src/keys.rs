//! Key schema of the registry
//!
//! All registry state lives under the `sr/` root:
//!
//! - `sr/ms/{domain}/{project}/{serviceId}` - microservice record
//! - `sr/inst/{domain}/{project}/{serviceId}/{instanceId}` - instance record
//! - `sr/index/{domain}/{project}/{env}/{app}/{name}/{version}` - service key index -> serviceId
//! - `sr/dep/{domain}/{project}/{consumerId}/{providerApp}/{providerName}` - dependency edge
//! - `sr/lease/{serviceId}/{instanceId}` - lease ttl
//! - `sr/lock/{name}` - advisory lock

pub const ROOT: &str = "sr";

pub fn service_key(domain: &str, project: &str, service_id: &str) -> String {
    format!("{}/ms/{}/{}/{}", ROOT, domain, project, service_id)
}

pub fn service_prefix(domain: &str, project: &str) -> String {
    format!("{}/ms/{}/{}/", ROOT, domain, project)
}

pub fn all_services_prefix() -> String {
    format!("{}/ms/", ROOT)
}

pub fn instance_key(domain: &str, project: &str, service_id: &str, instance_id: &str) -> String {
    format!(
        "{}/inst/{}/{}/{}/{}",
        ROOT, domain, project, service_id, instance_id
    )
}

pub fn instance_prefix(domain: &str, project: &str, service_id: &str) -> String {
    format!("{}/inst/{}/{}/{}/", ROOT, domain, project, service_id)
}

pub fn all_instances_prefix() -> String {
    format!("{}/inst/", ROOT)
}

#[allow(clippy::too_many_arguments)]
pub fn index_key(
    domain: &str,
    project: &str,
    environment: &str,
    app_id: &str,
    service_name: &str,
    version: &str,
) -> String {
    format!(
        "{}/index/{}/{}/{}/{}/{}/{}",
        ROOT, domain, project, environment, app_id, service_name, version
    )
}

/// Prefix covering every version of one service name.
pub fn index_versions_prefix(
    domain: &str,
    project: &str,
    environment: &str,
    app_id: &str,
    service_name: &str,
) -> String {
    format!(
        "{}/index/{}/{}/{}/{}/{}/",
        ROOT, domain, project, environment, app_id, service_name
    )
}

pub fn all_index_prefix() -> String {
    format!("{}/index/", ROOT)
}

pub fn dependency_key(
    domain: &str,
    project: &str,
    consumer_id: &str,
    provider_app: &str,
    provider_name: &str,
) -> String {
    format!(
        "{}/dep/{}/{}/{}/{}/{}",
        ROOT, domain, project, consumer_id, provider_app, provider_name
    )
}

pub fn all_dependencies_prefix() -> String {
    format!("{}/dep/", ROOT)
}

pub fn lease_key(service_id: &str, instance_id: &str) -> String {
    format!("{}/lease/{}/{}", ROOT, service_id, instance_id)
}

pub fn lease_prefix(service_id: &str) -> String {
    format!("{}/lease/{}/", ROOT, service_id)
}

pub fn lock_key(name: &str) -> String {
    format!("{}/lock/{}", ROOT, name)
}

/// Splits a key into its `/`-separated segments.
pub fn segments(key: &str) -> Vec<&str> {
    key.split('/').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_key_layout() {
        assert_eq!(
            service_key("default", "default", "abc"),
            "sr/ms/default/default/abc"
        );
        assert!(service_key("default", "default", "abc").starts_with(&service_prefix(
            "default", "default"
        )));
    }

    #[test]
    fn test_instance_key_layout() {
        let key = instance_key("d", "p", "sid", "iid");
        assert_eq!(key, "sr/inst/d/p/sid/iid");
        assert!(key.starts_with(&instance_prefix("d", "p", "sid")));
    }

    #[test]
    fn test_index_key_layout() {
        let key = index_key("d", "p", "production", "app", "svc", "1.0.0");
        assert_eq!(key, "sr/index/d/p/production/app/svc/1.0.0");
        assert!(key.starts_with(&index_versions_prefix("d", "p", "production", "app", "svc")));
    }

    #[test]
    fn test_segments() {
        let key = instance_key("d", "p", "sid", "iid");
        let segs = segments(&key);
        assert_eq!(segs, vec!["sr", "inst", "d", "p", "sid", "iid"]);
    }
}

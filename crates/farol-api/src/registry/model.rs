//! Registry entities: microservice, instance, health check
//!
//! Wire format is camelCase JSON; timestamps travel as unix-epoch seconds
//! rendered as decimal strings.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::PROP_ALLOW_CROSS_APP;

/// Microservice status
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    #[default]
    Up,
    Down,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Up => "UP",
            ServiceStatus::Down => "DOWN",
        }
    }
}

impl Display for ServiceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(ServiceStatus::Up),
            "DOWN" => Ok(ServiceStatus::Down),
            _ => Err(format!("Invalid service status: {}", s)),
        }
    }
}

/// Instance status
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstanceStatus {
    #[default]
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "OUTOFSERVICE")]
    OutOfService,
    #[serde(rename = "TESTING")]
    Testing,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Up => "UP",
            InstanceStatus::Down => "DOWN",
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::OutOfService => "OUTOFSERVICE",
            InstanceStatus::Testing => "TESTING",
        }
    }
}

impl Display for InstanceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(InstanceStatus::Up),
            "DOWN" => Ok(InstanceStatus::Down),
            "STARTING" => Ok(InstanceStatus::Starting),
            "OUTOFSERVICE" => Ok(InstanceStatus::OutOfService),
            "TESTING" => Ok(InstanceStatus::Testing),
            _ => Err(format!("Invalid instance status: {}", s)),
        }
    }
}

/// Health check declaration of an instance.
///
/// `push` mode means the client heartbeats; the effective lease TTL is
/// `interval * (times + 1)` seconds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheck {
    pub mode: String,
    pub interval: i64,
    pub times: i64,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            mode: "push".to_string(),
            interval: 30,
            times: 3,
        }
    }
}

impl HealthCheck {
    /// Lease TTL implied by this declaration, in seconds.
    pub fn ttl_seconds(&self) -> i64 {
        self.interval * (self.times + 1)
    }
}

/// A registered microservice.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MicroService {
    pub service_id: String,
    pub app_id: String,
    pub service_name: String,
    pub version: String,
    pub environment: String,
    pub level: String,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    /// Creation time, unix-epoch seconds as string.
    pub timestamp: String,
    /// Last modification time, unix-epoch seconds as string.
    pub mod_timestamp: String,
}

impl MicroService {
    /// Whether consumers from other applications may discover this service.
    pub fn allow_cross_app(&self) -> bool {
        self.properties
            .get(PROP_ALLOW_CROSS_APP)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn key(&self, domain: &str, project: &str) -> MicroServiceKey {
        MicroServiceKey {
            domain: domain.to_string(),
            project: project.to_string(),
            environment: self.environment.clone(),
            app_id: self.app_id.clone(),
            service_name: self.service_name.clone(),
            version: self.version.clone(),
        }
    }

    pub fn create_time(&self) -> i64 {
        self.timestamp.parse().unwrap_or(0)
    }
}

/// The ordered tuple naming a microservice uniquely.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase", default)]
pub struct MicroServiceKey {
    pub domain: String,
    pub project: String,
    pub environment: String,
    pub app_id: String,
    pub service_name: String,
    pub version: String,
}

/// A running instance of a microservice.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MicroServiceInstance {
    pub instance_id: String,
    pub service_id: String,
    pub endpoints: Vec<String>,
    pub host_name: String,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    pub timestamp: String,
    pub mod_timestamp: String,
}

impl MicroServiceInstance {
    /// Identity used for idempotent re-registration: an instance is the
    /// same instance when its endpoints and host match.
    pub fn same_endpoints(&self, other: &MicroServiceInstance) -> bool {
        self.host_name == other.host_name && self.endpoints == other.endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_status_round_trip() {
        assert_eq!("UP".parse::<ServiceStatus>().unwrap(), ServiceStatus::Up);
        assert_eq!("DOWN".parse::<ServiceStatus>().unwrap(), ServiceStatus::Down);
        assert!("SIDEWAYS".parse::<ServiceStatus>().is_err());
    }

    #[test]
    fn test_instance_status_wire_names() {
        let json = serde_json::to_string(&InstanceStatus::OutOfService).unwrap();
        assert_eq!(json, "\"OUTOFSERVICE\"");
        assert_eq!(
            "OUTOFSERVICE".parse::<InstanceStatus>().unwrap(),
            InstanceStatus::OutOfService
        );
    }

    #[test]
    fn test_health_check_ttl() {
        let hc = HealthCheck {
            mode: "push".to_string(),
            interval: 5,
            times: 3,
        };
        assert_eq!(hc.ttl_seconds(), 20);
    }

    #[test]
    fn test_allow_cross_app() {
        let mut ms = MicroService::default();
        assert!(!ms.allow_cross_app());
        ms.properties
            .insert(PROP_ALLOW_CROSS_APP.to_string(), "true".to_string());
        assert!(ms.allow_cross_app());
        ms.properties
            .insert(PROP_ALLOW_CROSS_APP.to_string(), "false".to_string());
        assert!(!ms.allow_cross_app());
    }

    #[test]
    fn test_same_endpoints() {
        let a = MicroServiceInstance {
            host_name: "host-1".to_string(),
            endpoints: vec!["rest:127.0.0.1:8080".to_string()],
            ..Default::default()
        };
        let mut b = a.clone();
        assert!(a.same_endpoints(&b));
        b.endpoints = vec!["rest:127.0.0.2:8080".to_string()];
        assert!(!a.same_endpoints(&b));
    }

    #[test]
    fn test_microservice_wire_shape() {
        let ms = MicroService {
            service_id: "abc".to_string(),
            app_id: "app".to_string(),
            service_name: "svc".to_string(),
            version: "1.0.0".to_string(),
            environment: String::new(),
            level: "FRONT".to_string(),
            status: ServiceStatus::Up,
            properties: HashMap::new(),
            timestamp: "100".to_string(),
            mod_timestamp: "100".to_string(),
        };
        let json = serde_json::to_value(&ms).unwrap();
        assert_eq!(json["serviceId"], "abc");
        assert_eq!(json["serviceName"], "svc");
        assert_eq!(json["status"], "UP");
        // empty properties are omitted from the wire form
        assert!(json.get("properties").is_none());
    }
}

//! Request and response bodies for the registry and discovery endpoints
//!
//! Every response carries the envelope status under the `response` field;
//! payload fields sit next to it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::ResponseStatus;
use crate::registry::model::{MicroService, MicroServiceInstance};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateServiceRequest {
    pub service: MicroService,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceResponse {
    pub response: ResponseStatus,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub service_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetServiceResponse {
    pub response: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub service: Option<MicroService>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetServicesResponse {
    pub response: ResponseStatus,
    pub services: Vec<MicroService>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteServiceResponse {
    pub response: ResponseStatus,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdatePropertiesRequest {
    pub properties: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterInstanceRequest {
    pub instance: MicroServiceInstance,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInstanceResponse {
    pub response: ResponseStatus,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub instance_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub response: ResponseStatus,
}

/// One `(serviceId, instanceId)` element of a batched heartbeat.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatElement {
    pub service_id: String,
    pub instance_id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSetRequest {
    pub instances: Vec<HeartbeatElement>,
}

/// Per-element outcome of a batched heartbeat.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResult {
    pub service_id: String,
    pub instance_id: String,
    pub error_code: i32,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub err_message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatSetResponse {
    pub response: ResponseStatus,
    pub instances: Vec<HeartbeatResult>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindInstancesResponse {
    pub response: ResponseStatus,
    pub instances: Vec<MicroServiceInstance>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInstanceResponse {
    pub response: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub instance: Option<MicroServiceInstance>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInstancesResponse {
    pub response: ResponseStatus,
    pub instances: Vec<MicroServiceInstance>,
}

/// One service-level item of a batch query; `version` holds the version
/// rule, `rev` the revision the caller already has.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FindService {
    pub service: FindServiceKey,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rev: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FindServiceKey {
    pub app_id: String,
    pub service_name: String,
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub environment: String,
}

/// One instance-level item of a batch query: a direct lookup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FindInstance {
    pub instance: HeartbeatElement,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rev: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchFindRequest {
    pub services: Vec<FindService>,
    pub instances: Vec<FindInstance>,
}

/// Successfully refreshed batch item, keyed by its request index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FindResult {
    pub index: i64,
    pub rev: String,
    pub instances: Vec<MicroServiceInstance>,
}

/// Failed batch items sharing one error, keyed by their request indexes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindFailedResult {
    pub indexes: Vec<i64>,
    pub error: ResponseStatus,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchFindResult {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<FindResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_modified: Vec<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FindFailedResult>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFindResponse {
    pub response: ResponseStatus,
    #[serde(default)]
    pub services: BatchFindResult,
    #[serde(default)]
    pub instances: BatchFindResult,
}

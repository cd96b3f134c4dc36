//! Request-scope extraction, query parameters and error mapping shared by
//! the v4 handlers.

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, HttpResponseBuilder};
use farol_api::model::{
    ResponseStatus, DEFAULT_DOMAIN, HEADER_CONSUMER_ID, HEADER_DOMAIN, HEADER_REVISION,
};
use farol_common::error::RegistryError;
use farol_registry::RequestScope;
use serde::{Deserialize, Serialize};

/// The envelope with no payload fields; used for errors and bare acks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub response: ResponseStatus,
}

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Builds the request scope from the tenant headers and the path project.
pub fn scope_from(req: &HttpRequest, project: &str) -> RequestScope {
    let domain = header(req, HEADER_DOMAIN).unwrap_or_else(|| DEFAULT_DOMAIN.to_string());
    let mut scope = RequestScope::new(&domain, project);
    if let Some(consumer_id) = header(req, HEADER_CONSUMER_ID) {
        scope.consumer_id = consumer_id;
    }
    if let Some(rev) = header(req, HEADER_REVISION) {
        if !rev.is_empty() {
            scope.request_rev = Some(rev);
        }
    }
    scope
}

/// Maps an engine error onto a status code and the response envelope.
/// `NotModified` turns into a bare 304.
pub fn error_response(err: &RegistryError) -> HttpResponse {
    let status = match err {
        RegistryError::NotModified => return HttpResponse::NotModified().finish(),
        RegistryError::InvalidParameter(_)
        | RegistryError::ServiceNotExists
        | RegistryError::ServiceAlreadyExists(_)
        | RegistryError::InstanceNotExists
        | RegistryError::PermissionDenied(_)
        | RegistryError::Conflict(_) => StatusCode::BAD_REQUEST,
        RegistryError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        RegistryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    HttpResponseBuilder::new(status).json(StatusEnvelope {
        response: err.into(),
    })
}

/// Query parameters of `GET /instances`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FindQuery {
    pub app_id: String,
    pub service_name: String,
    pub version: String,
    pub env: Option<String>,
    /// Comma-separated tag list.
    pub tags: Option<String>,
    pub no_cache: Option<bool>,
    /// Revision the caller holds; the header takes precedence.
    pub rev: Option<String>,
}

impl FindQuery {
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Query parameters of `POST /instances/action`.
#[derive(Clone, Debug, Deserialize)]
pub struct ActionQuery {
    #[serde(rename = "type")]
    pub action_type: String,
}

/// Query parameters of `DELETE /microservices/{serviceId}`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ForceQuery {
    pub force: bool,
}

/// Query parameters of the instance status update.
#[derive(Clone, Debug, Deserialize)]
pub struct StatusQuery {
    pub value: String,
}

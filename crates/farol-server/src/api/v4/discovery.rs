//! V4 discovery handlers
//!
//! - GET  /v4/{project}/registry/instances - FindInstances
//! - POST /v4/{project}/registry/instances/action?type=query - BatchFind

use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};

use farol_api::discovery::model::{BatchFindRequest, BatchFindResponse, FindInstancesResponse};
use farol_api::model::{ResponseStatus, HEADER_REVISION};
use farol_common::error::RegistryError;
use farol_registry::{FindOutcome, FindRequest};

use crate::api::model::{error_response, scope_from, ActionQuery, FindQuery};
use crate::model::AppState;

#[get("/instances")]
pub async fn find_instances(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<FindQuery>,
) -> impl Responder {
    let project = path.into_inner();
    let mut scope = scope_from(&req, &project);
    scope.no_cache = query.no_cache.unwrap_or(false);
    if scope.request_rev.is_none() {
        scope.request_rev = query.rev.clone().filter(|r| !r.is_empty());
    }
    let find = FindRequest {
        app_id: query.app_id.clone(),
        service_name: query.service_name.clone(),
        version_rule: query.version.clone(),
        environment: query.env.clone(),
        tags: query.tag_list(),
    };
    match state.registry.discovery.find_instances(&scope, &find).await {
        Ok(FindOutcome::Updated { instances, rev }) => HttpResponse::Ok()
            .insert_header((HEADER_REVISION, rev))
            .json(FindInstancesResponse {
                response: ResponseStatus::ok(),
                instances,
            }),
        Ok(FindOutcome::NotModified { rev }) => HttpResponse::NotModified()
            .insert_header((HEADER_REVISION, rev))
            .finish(),
        Err(err) => error_response(&err),
    }
}

#[post("/instances/action")]
pub async fn batch_find(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ActionQuery>,
    body: web::Json<BatchFindRequest>,
) -> impl Responder {
    if query.action_type != "query" {
        return error_response(&RegistryError::InvalidParameter(format!(
            "unsupported action '{}'",
            query.action_type
        )));
    }
    let project = path.into_inner();
    let scope = scope_from(&req, &project);
    match state
        .registry
        .discovery
        .batch_find(&scope, &body.into_inner())
        .await
    {
        Ok((services, instances)) => HttpResponse::Ok().json(BatchFindResponse {
            response: ResponseStatus::ok(),
            services,
            instances,
        }),
        Err(err) => error_response(&err),
    }
}

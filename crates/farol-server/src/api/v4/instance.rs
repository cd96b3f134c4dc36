//! V4 instance handlers
//!
//! - POST   .../microservices/{serviceId}/instances - RegisterInstance
//! - GET    .../microservices/{serviceId}/instances - GetInstances (consumer view)
//! - GET    .../microservices/{serviceId}/instances/{instanceId} - GetInstance
//! - DELETE .../microservices/{serviceId}/instances/{instanceId} - UnregisterInstance
//! - PUT    .../microservices/{serviceId}/instances/{instanceId}/heartbeat - Heartbeat
//! - PUT    .../microservices/{serviceId}/instances/{instanceId}/status - Update status
//! - PUT    .../microservices/{serviceId}/instances/{instanceId}/properties - Update properties
//! - PUT    .../heartbeats - HeartbeatSet

use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};

use farol_api::discovery::model::{
    GetInstanceResponse, GetInstancesResponse, HeartbeatResponse, HeartbeatSetRequest,
    HeartbeatSetResponse, RegisterInstanceRequest, RegisterInstanceResponse,
    UpdatePropertiesRequest,
};
use farol_api::model::{ResponseStatus, HEADER_REVISION};
use farol_common::error::{RegistryError, ERR_INSTANCE_NOT_EXISTS};

use crate::api::model::{error_response, scope_from, StatusQuery};
use crate::model::AppState;

#[post("/microservices/{service_id}/instances")]
pub async fn register_instance(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<RegisterInstanceRequest>,
) -> impl Responder {
    let (project, service_id) = path.into_inner();
    let scope = scope_from(&req, &project);
    let mut instance = body.into_inner().instance;
    instance.service_id = service_id;
    match state
        .registry
        .service
        .register_instance(&scope.domain, &scope.project, instance)
        .await
    {
        Ok(instance_id) => HttpResponse::Ok().json(RegisterInstanceResponse {
            response: ResponseStatus::ok(),
            instance_id,
        }),
        Err(err) => error_response(&err),
    }
}

#[get("/microservices/{service_id}/instances")]
pub async fn get_instances(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (project, service_id) = path.into_inner();
    let scope = scope_from(&req, &project);
    match state.registry.discovery.get_instances(&scope, &service_id).await {
        Ok((instances, rev)) => {
            if scope.request_rev.as_deref() == Some(rev.as_str()) {
                return HttpResponse::NotModified()
                    .insert_header((HEADER_REVISION, rev))
                    .finish();
            }
            HttpResponse::Ok()
                .insert_header((HEADER_REVISION, rev))
                .json(GetInstancesResponse {
                    response: ResponseStatus::ok(),
                    instances,
                })
        }
        Err(err) => error_response(&err),
    }
}

#[get("/microservices/{service_id}/instances/{instance_id}")]
pub async fn get_instance(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String, String)>,
) -> impl Responder {
    let (project, service_id, instance_id) = path.into_inner();
    let scope = scope_from(&req, &project);
    match state
        .registry
        .discovery
        .get_instance(&scope, &service_id, &instance_id)
        .await
    {
        Ok((instance, rev)) => HttpResponse::Ok()
            .insert_header((HEADER_REVISION, rev))
            .json(GetInstanceResponse {
                response: ResponseStatus::ok(),
                instance: Some(instance),
            }),
        Err(err) => error_response(&err),
    }
}

#[delete("/microservices/{service_id}/instances/{instance_id}")]
pub async fn unregister_instance(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String, String)>,
) -> impl Responder {
    let (project, service_id, instance_id) = path.into_inner();
    let scope = scope_from(&req, &project);
    match state
        .registry
        .service
        .unregister_instance(&scope.domain, &scope.project, &service_id, &instance_id)
        .await
    {
        Ok(()) => HttpResponse::Ok().json(HeartbeatResponse {
            response: ResponseStatus::ok(),
        }),
        Err(err) => error_response(&err),
    }
}

#[put("/microservices/{service_id}/instances/{instance_id}/heartbeat")]
pub async fn heartbeat(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String, String)>,
) -> impl Responder {
    let (project, service_id, instance_id) = path.into_inner();
    let scope = scope_from(&req, &project);
    match state
        .registry
        .service
        .heartbeat(&scope.domain, &scope.project, &service_id, &instance_id)
        .await
    {
        Ok(()) => HttpResponse::Ok().json(HeartbeatResponse {
            response: ResponseStatus::ok(),
        }),
        Err(err) => error_response(&err),
    }
}

#[put("/heartbeats")]
pub async fn heartbeat_set(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<HeartbeatSetRequest>,
) -> impl Responder {
    let project = path.into_inner();
    let scope = scope_from(&req, &project);
    let request = body.into_inner();
    if request.instances.is_empty() {
        return error_response(&RegistryError::InvalidParameter(
            "heartbeat set is empty".to_string(),
        ));
    }
    let results = state
        .registry
        .service
        .heartbeat_set(&scope.domain, &scope.project, &request.instances)
        .await;
    let all_failed = results.iter().all(|r| r.error_code != 0);
    let response = if all_failed {
        ResponseStatus::from_code(ERR_INSTANCE_NOT_EXISTS)
    } else {
        ResponseStatus::ok()
    };
    let body = HeartbeatSetResponse {
        response,
        instances: results,
    };
    if all_failed {
        HttpResponse::BadRequest().json(body)
    } else {
        HttpResponse::Ok().json(body)
    }
}

#[put("/microservices/{service_id}/instances/{instance_id}/status")]
pub async fn update_instance_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String, String)>,
    query: web::Query<StatusQuery>,
) -> impl Responder {
    let (project, service_id, instance_id) = path.into_inner();
    let scope = scope_from(&req, &project);
    let status = match query.value.parse() {
        Ok(status) => status,
        Err(_) => {
            return error_response(&RegistryError::InvalidParameter(format!(
                "status '{}' is invalid",
                query.value
            )));
        }
    };
    match state
        .registry
        .service
        .update_instance_status(&scope.domain, &scope.project, &service_id, &instance_id, status)
        .await
    {
        Ok(()) => HttpResponse::Ok().json(HeartbeatResponse {
            response: ResponseStatus::ok(),
        }),
        Err(err) => error_response(&err),
    }
}

#[put("/microservices/{service_id}/instances/{instance_id}/properties")]
pub async fn update_instance_properties(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String, String)>,
    body: web::Json<UpdatePropertiesRequest>,
) -> impl Responder {
    let (project, service_id, instance_id) = path.into_inner();
    let scope = scope_from(&req, &project);
    match state
        .registry
        .service
        .update_instance_properties(
            &scope.domain,
            &scope.project,
            &service_id,
            &instance_id,
            body.into_inner().properties,
        )
        .await
    {
        Ok(()) => HttpResponse::Ok().json(HeartbeatResponse {
            response: ResponseStatus::ok(),
        }),
        Err(err) => error_response(&err),
    }
}

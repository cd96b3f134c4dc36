//! V4 microservice handlers
//!
//! - POST   /v4/{project}/registry/microservices - RegisterService
//! - GET    /v4/{project}/registry/microservices - List services
//! - GET    /v4/{project}/registry/microservices/{serviceId} - Get service
//! - DELETE /v4/{project}/registry/microservices/{serviceId} - UnregisterService
//! - PUT    /v4/{project}/registry/microservices/{serviceId}/properties - Update properties

use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};

use farol_api::discovery::model::{
    CreateServiceRequest, CreateServiceResponse, DeleteServiceResponse, GetServiceResponse,
    GetServicesResponse, UpdatePropertiesRequest,
};
use farol_api::model::ResponseStatus;

use crate::api::model::{error_response, scope_from, ForceQuery};
use crate::model::AppState;

#[post("/microservices")]
pub async fn register_service(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<CreateServiceRequest>,
) -> impl Responder {
    let project = path.into_inner();
    let scope = scope_from(&req, &project);
    match state
        .registry
        .service
        .register_service(&scope.domain, &scope.project, body.into_inner().service)
        .await
    {
        Ok(service_id) => HttpResponse::Ok().json(CreateServiceResponse {
            response: ResponseStatus::ok(),
            service_id,
        }),
        Err(err) => error_response(&err),
    }
}

#[get("/microservices")]
pub async fn list_services(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let project = path.into_inner();
    let scope = scope_from(&req, &project);
    let services = state
        .registry
        .service
        .list_services(&scope.domain, &scope.project);
    HttpResponse::Ok().json(GetServicesResponse {
        response: ResponseStatus::ok(),
        services,
    })
}

#[get("/microservices/{service_id}")]
pub async fn get_service(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (project, service_id) = path.into_inner();
    let scope = scope_from(&req, &project);
    match state
        .registry
        .service
        .get_service(&scope.domain, &scope.project, &service_id)
        .await
    {
        Ok(service) => HttpResponse::Ok().json(GetServiceResponse {
            response: ResponseStatus::ok(),
            service: Some(service),
        }),
        Err(err) => error_response(&err),
    }
}

#[delete("/microservices/{service_id}")]
pub async fn unregister_service(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    query: web::Query<ForceQuery>,
) -> impl Responder {
    let (project, service_id) = path.into_inner();
    let scope = scope_from(&req, &project);
    match state
        .registry
        .service
        .unregister_service(&scope.domain, &scope.project, &service_id, query.force)
        .await
    {
        Ok(()) => HttpResponse::Ok().json(DeleteServiceResponse {
            response: ResponseStatus::ok(),
        }),
        Err(err) => error_response(&err),
    }
}

#[put("/microservices/{service_id}/properties")]
pub async fn update_service_properties(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<UpdatePropertiesRequest>,
) -> impl Responder {
    let (project, service_id) = path.into_inner();
    let scope = scope_from(&req, &project);
    match state
        .registry
        .service
        .update_service_properties(
            &scope.domain,
            &scope.project,
            &service_id,
            body.into_inner().properties,
        )
        .await
    {
        Ok(()) => HttpResponse::Ok().json(DeleteServiceResponse {
            response: ResponseStatus::ok(),
        }),
        Err(err) => error_response(&err),
    }
}

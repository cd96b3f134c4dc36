//! V4 API routing configuration
//!
//! Routes:
//! - POST   /v4/{project}/registry/microservices - Register service
//! - GET    /v4/{project}/registry/microservices - List services
//! - GET    /v4/{project}/registry/microservices/{serviceId} - Get service
//! - DELETE /v4/{project}/registry/microservices/{serviceId} - Unregister service
//! - PUT    /v4/{project}/registry/microservices/{serviceId}/properties - Update properties
//! - POST   /v4/{project}/registry/microservices/{serviceId}/instances - Register instance
//! - GET    /v4/{project}/registry/microservices/{serviceId}/instances - Get instances
//! - GET    /v4/{project}/registry/microservices/{serviceId}/instances/{instanceId} - Get instance
//! - DELETE /v4/{project}/registry/microservices/{serviceId}/instances/{instanceId} - Unregister instance
//! - PUT    /v4/{project}/registry/microservices/{serviceId}/instances/{instanceId}/heartbeat - Heartbeat
//! - PUT    /v4/{project}/registry/microservices/{serviceId}/instances/{instanceId}/status - Update status
//! - PUT    /v4/{project}/registry/microservices/{serviceId}/instances/{instanceId}/properties - Update properties
//! - PUT    /v4/{project}/registry/heartbeats - Batched heartbeat
//! - GET    /v4/{project}/registry/instances - Find instances
//! - POST   /v4/{project}/registry/instances/action - Batch find
//! - GET    /v4/{project}/registry/health - Liveness
//! - GET    /v4/{project}/registry/websocket - Change-event push

use actix_web::{web, Scope};

use super::{discovery, health, instance, service, websocket};

pub fn routes() -> Scope {
    web::scope("/v4/{project}/registry")
        .service(service::register_service)
        .service(service::list_services)
        .service(service::get_service)
        .service(service::unregister_service)
        .service(service::update_service_properties)
        .service(instance::register_instance)
        .service(instance::get_instances)
        .service(instance::get_instance)
        .service(instance::unregister_instance)
        .service(instance::heartbeat)
        .service(instance::heartbeat_set)
        .service(instance::update_instance_status)
        .service(instance::update_instance_properties)
        .service(discovery::find_instances)
        .service(discovery::batch_find)
        .service(health::health)
        .service(websocket::websocket)
}

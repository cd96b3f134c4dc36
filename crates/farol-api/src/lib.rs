//! Farol API - Wire models and constants
//!
//! This crate defines:
//! - Registry entities (microservice, instance, health check)
//! - Discovery request/response bodies
//! - Header/parameter constants shared by server and clients
//! - Request field validation

pub mod discovery;
pub mod model;
pub mod registry;
pub mod validation;

pub use model::ResponseStatus;
pub use registry::model::{
    HealthCheck, InstanceStatus, MicroService, MicroServiceInstance, MicroServiceKey,
    ServiceStatus,
};

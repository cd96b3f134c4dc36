//! Liveness probe.

use actix_web::{get, web, HttpResponse, Responder};

use farol_api::model::ResponseStatus;

use crate::api::model::StatusEnvelope;
use crate::model::AppState;

#[get("/health")]
pub async fn health(_state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(StatusEnvelope {
        response: ResponseStatus::ok(),
    })
}

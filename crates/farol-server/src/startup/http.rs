//! HTTP server setup.

use std::sync::Arc;

use actix_web::{dev::Server, middleware::Logger, web, App, HttpServer};

use crate::api;
use crate::middleware::Deadline;
use crate::model::AppState;

/// Creates and binds the registry HTTP server.
pub fn registry_server(
    state: Arc<AppState>,
    address: String,
    port: u16,
) -> Result<Server, std::io::Error> {
    Ok(HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(Deadline::with_defaults())
            .app_data(web::Data::new((*state).clone()))
            .service(api::v4::route::routes())
    })
    .bind((address, port))?
    .run())
}

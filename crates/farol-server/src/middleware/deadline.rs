// Request deadline middleware
// Every request gets a deadline; store operations run under it and an
// expired request answers 504 without partial effects (writes are atomic
// at the transaction boundary).

use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::time::Duration;

use actix_web::{
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    Error, HttpResponse,
};
use farol_api::model::ResponseStatus;
use farol_common::error::ERR_DEADLINE_EXCEEDED;
use serde::Serialize;
use tracing::warn;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct DeadlineExceededBody {
    response: ResponseStatus,
}

/// Deadline middleware factory.
pub struct Deadline {
    timeout: Duration,
}

impl Deadline {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl<S, B> Transform<S, ServiceRequest> for Deadline
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = DeadlineMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(DeadlineMiddleware {
            service,
            timeout: self.timeout,
        }))
    }
}

pub struct DeadlineMiddleware<S> {
    service: S,
    timeout: Duration,
}

impl<S, B> Service<ServiceRequest> for DeadlineMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let http_req = req.request().clone();
        let path = req.path().to_string();
        let timeout = self.timeout;
        let fut = self.service.call(req);

        Box::pin(async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result.map(|res| res.map_into_left_body()),
                Err(_) => {
                    warn!(%path, timeout_secs = timeout.as_secs(), "request deadline exceeded");
                    let response = HttpResponse::build(StatusCode::GATEWAY_TIMEOUT)
                        .json(DeadlineExceededBody {
                            response: ResponseStatus::from_code(ERR_DEADLINE_EXCEEDED),
                        })
                        .map_into_right_body();
                    Ok(ServiceResponse::new(http_req, response))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App};

    async fn slow_handler() -> HttpResponse {
        tokio::time::sleep(Duration::from_millis(200)).await;
        HttpResponse::Ok().finish()
    }

    async fn fast_handler() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    #[actix_web::test]
    async fn test_expired_request_gets_504() {
        let app = test::init_service(
            App::new()
                .wrap(Deadline::new(Duration::from_millis(50)))
                .route("/slow", web::get().to(slow_handler)),
        )
        .await;

        let req = test::TestRequest::get().uri("/slow").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["response"]["code"], 500002);
    }

    #[actix_web::test]
    async fn test_fast_request_passes_through() {
        let app = test::init_service(
            App::new()
                .wrap(Deadline::new(Duration::from_millis(500)))
                .route("/fast", web::get().to(fast_handler)),
        )
        .await;

        let req = test::TestRequest::get().uri("/fast").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

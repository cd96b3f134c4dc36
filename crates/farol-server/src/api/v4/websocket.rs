//! Websocket push endpoint
//!
//! A subscriber connects with its tenant headers and optional provider
//! filter headers; the server forwards matching change events as JSON
//! `{action, service, instance, rev}` frames, including the RESYNC
//! sentinel after an overflow. The session pings every 30 seconds and
//! closes when a pong goes missing; closing the socket tears the
//! subscription down.

use std::time::Duration;

use actix_web::{get, web, HttpRequest, HttpResponse};
use actix_ws::Message;
use futures_util::StreamExt;
use tracing::{debug, warn};

use farol_api::model::{HEADER_PROVIDER_APP, HEADER_PROVIDER_NAME};
use farol_registry::SubscribeFilter;

use crate::api::model::scope_from;
use crate::model::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[get("/websocket")]
pub async fn websocket(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Payload,
) -> Result<HttpResponse, actix_web::Error> {
    let project = path.into_inner();
    let scope = scope_from(&req, &project);
    let filter = SubscribeFilter {
        domain: scope.domain.clone(),
        project: scope.project.clone(),
        consumer_service_id: if scope.consumer_id.is_empty() {
            None
        } else {
            Some(scope.consumer_id.clone())
        },
        provider: match (
            header(&req, HEADER_PROVIDER_APP),
            header(&req, HEADER_PROVIDER_NAME),
        ) {
            (Some(app), Some(name)) => Some((app, name)),
            _ => None,
        },
    };

    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;
    let mut subscription = state.registry.bus.subscribe(filter);
    debug!(subscriber = %subscription.id(), "websocket subscriber connected");

    actix_web::rt::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await; // the first tick fires immediately
        let mut awaiting_pong = false;
        loop {
            tokio::select! {
                message = msg_stream.next() => match message {
                    Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                    Some(Ok(Message::Ping(payload))) => {
                        if session.pong(&payload).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        warn!(%err, "websocket protocol error");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
                event = subscription.recv() => match event {
                    Some(event) => {
                        let frame = match serde_json::to_string(&event) {
                            Ok(frame) => frame,
                            Err(err) => {
                                warn!(%err, "failed to encode push event");
                                continue;
                            }
                        };
                        if session.text(frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if awaiting_pong {
                        debug!("websocket pong missing, closing");
                        break;
                    }
                    if session.ping(b"").await.is_err() {
                        break;
                    }
                    awaiting_pong = true;
                }
            }
        }
        let _ = session.close(None).await;
        debug!("websocket subscriber disconnected");
    });

    Ok(response)
}

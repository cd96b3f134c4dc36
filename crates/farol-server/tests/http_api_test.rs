// Integration tests for the v4 REST surface
// Drives the HTTP handlers against an in-process registry graph and
// checks the response envelope, revision headers and error codes.

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};

use farol_registry::{Registry, RegistryOptions};
use farol_server::api;
use farol_server::config::Configuration;
use farol_server::model::AppState;
use farol_store::{KvStore, MemoryStore};

async fn test_state() -> AppState {
    let store = Arc::new(MemoryStore::new()) as Arc<dyn KvStore>;
    let registry = Arc::new(Registry::new(store, RegistryOptions::default()));
    registry.start().await.unwrap();
    AppState {
        registry,
        configuration: Arc::new(Configuration::new().unwrap()),
    }
}

/// Blocks until the cache has applied every write under the prefixes it
/// watches (lease and dependency keys are not indexed).
async fn sync(state: &AppState) {
    let mut target = 0i64;
    for prefix in ["sr/ms/", "sr/inst/", "sr/index/"] {
        let resp = state.registry.store.range(prefix).await.unwrap();
        if let Some(max) = resp.kvs.iter().map(|kv| kv.mod_rev).max() {
            target = target.max(max);
        }
    }
    for _ in 0..500 {
        if state.registry.cache.highest_rev() >= target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("cache failed to catch up");
}

macro_rules! test_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .service(api::v4::route::routes()),
        )
        .await
    };
}

fn service_body(app: &str, name: &str, version: &str) -> Value {
    json!({
        "service": {
            "appId": app,
            "serviceName": name,
            "version": version,
            "level": "FRONT",
            "status": "UP"
        }
    })
}

fn instance_body(endpoint: &str) -> Value {
    json!({
        "instance": {
            "hostName": "UT-HOST",
            "endpoints": [endpoint],
            "status": "UP"
        }
    })
}

#[actix_web::test]
async fn test_register_service_and_instance() {
    let state = test_state().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v4/default/registry/microservices")
        .set_json(service_body("A", "order-service", "1.0.0"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["response"]["code"], 0);
    let service_id = body["serviceId"].as_str().unwrap().to_string();
    assert!(!service_id.is_empty());

    // Re-registering the same service key is idempotent.
    let req = test::TestRequest::post()
        .uri("/v4/default/registry/microservices")
        .set_json(service_body("A", "order-service", "1.0.0"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["serviceId"].as_str().unwrap(), service_id);

    sync(&state).await;
    let req = test::TestRequest::post()
        .uri(&format!(
            "/v4/default/registry/microservices/{}/instances",
            service_id
        ))
        .set_json(instance_body("rest:127.0.0.1:8080"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["response"]["code"], 0);
    assert!(!body["instanceId"].as_str().unwrap().is_empty());

    let req = test::TestRequest::get()
        .uri(&format!(
            "/v4/default/registry/microservices/{}",
            service_id
        ))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["service"]["serviceName"], "order-service");
}

#[actix_web::test]
async fn test_invalid_service_name_is_rejected() {
    let state = test_state().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v4/default/registry/microservices")
        .set_json(service_body("A", "not a name", "1.0.0"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["response"]["code"], 400001);
}

#[actix_web::test]
async fn test_find_instances_with_revision_header() {
    let state = test_state().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v4/default/registry/microservices")
        .set_json(service_body("A", "svc", "1.0.0"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let service_id = body["serviceId"].as_str().unwrap().to_string();
    sync(&state).await;

    let req = test::TestRequest::post()
        .uri(&format!(
            "/v4/default/registry/microservices/{}/instances",
            service_id
        ))
        .set_json(instance_body("rest:127.0.0.1:8080"))
        .to_request();
    let _: Value = test::call_and_read_body_json(&app, req).await;
    sync(&state).await;

    let find_uri = "/v4/default/registry/instances?appId=A&serviceName=svc&version=latest";
    let req = test::TestRequest::get()
        .uri(find_uri)
        .insert_header(("X-ConsumerId", service_id.as_str()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let rev = resp
        .headers()
        .get("X-Resource-Revision")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["instances"].as_array().unwrap().len(), 1);

    // Presenting the revision back collapses to 304 with no body.
    let req = test::TestRequest::get()
        .uri(find_uri)
        .insert_header(("X-ConsumerId", service_id.as_str()))
        .insert_header(("X-Resource-Revision", rev.as_str()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);

    // An unknown provider is a 400 with the service-not-exists code.
    let req = test::TestRequest::get()
        .uri("/v4/default/registry/instances?appId=A&serviceName=ghost&version=latest")
        .insert_header(("X-ConsumerId", service_id.as_str()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["response"]["code"], 400012);
}

#[actix_web::test]
async fn test_heartbeat_endpoints() {
    let state = test_state().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v4/default/registry/microservices")
        .set_json(service_body("A", "svc", "1.0.0"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let service_id = body["serviceId"].as_str().unwrap().to_string();
    sync(&state).await;

    let req = test::TestRequest::post()
        .uri(&format!(
            "/v4/default/registry/microservices/{}/instances",
            service_id
        ))
        .set_json(instance_body("rest:127.0.0.1:8080"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let instance_id = body["instanceId"].as_str().unwrap().to_string();

    let req = test::TestRequest::put()
        .uri(&format!(
            "/v4/default/registry/microservices/{}/instances/{}/heartbeat",
            service_id, instance_id
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // A heartbeat for an unknown instance fails without side effects.
    let req = test::TestRequest::put()
        .uri(&format!(
            "/v4/default/registry/microservices/{}/instances/not-exist/heartbeat",
            service_id
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["response"]["code"], 400017);

    // Batched heartbeats report per-element outcomes.
    let req = test::TestRequest::put()
        .uri("/v4/default/registry/heartbeats")
        .set_json(json!({
            "instances": [
                {"serviceId": service_id, "instanceId": instance_id},
                {"serviceId": service_id, "instanceId": "not-exist"}
            ]
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["response"]["code"], 0);
    let results = body["instances"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["errorCode"], 0);
    assert_ne!(results[1]["errorCode"], 0);
}

#[actix_web::test]
async fn test_batch_find_action() {
    let state = test_state().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v4/default/registry/microservices")
        .set_json(service_body("A", "svc", "1.0.5"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let service_id = body["serviceId"].as_str().unwrap().to_string();
    sync(&state).await;

    let req = test::TestRequest::post()
        .uri(&format!(
            "/v4/default/registry/microservices/{}/instances",
            service_id
        ))
        .set_json(instance_body("rest:127.0.0.1:8080"))
        .to_request();
    let _: Value = test::call_and_read_body_json(&app, req).await;
    sync(&state).await;

    let req = test::TestRequest::post()
        .uri("/v4/default/registry/instances/action?type=query")
        .insert_header(("X-ConsumerId", service_id.as_str()))
        .set_json(json!({
            "services": [
                {"service": {"appId": "A", "serviceName": "svc", "version": "latest"}},
                {"service": {"appId": "A", "serviceName": "svc", "version": "0.0.0"}}
            ]
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["response"]["code"], 0);
    assert_eq!(body["services"]["updated"][0]["index"], 0);
    assert_eq!(body["services"]["failed"][0]["indexes"][0], 1);
    assert_eq!(body["services"]["failed"][0]["error"]["code"], 400012);

    // Anything but type=query is rejected.
    let req = test::TestRequest::post()
        .uri("/v4/default/registry/instances/action?type=drop")
        .set_json(json!({"services": []}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_health_endpoint() {
    let state = test_state().await;
    let app = test_app!(state);

    let req = test::TestRequest::get()
        .uri("/v4/default/registry/health")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["response"]["code"], 0);
    assert_eq!(body["response"]["message"], "success");
}

#[actix_web::test]
async fn test_unregister_service_force_flag() {
    let state = test_state().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v4/default/registry/microservices")
        .set_json(service_body("A", "svc", "1.0.0"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let service_id = body["serviceId"].as_str().unwrap().to_string();
    sync(&state).await;

    let req = test::TestRequest::post()
        .uri(&format!(
            "/v4/default/registry/microservices/{}/instances",
            service_id
        ))
        .set_json(instance_body("rest:127.0.0.1:8080"))
        .to_request();
    let _: Value = test::call_and_read_body_json(&app, req).await;
    sync(&state).await;

    // With live instances the delete is refused...
    let req = test::TestRequest::delete()
        .uri(&format!(
            "/v4/default/registry/microservices/{}",
            service_id
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // ...unless forced.
    let req = test::TestRequest::delete()
        .uri(&format!(
            "/v4/default/registry/microservices/{}?force=true",
            service_id
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

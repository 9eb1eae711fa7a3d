//! HTTP API 集成测试

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use notification_service::{
    Hub, Pipeline, Publisher,
    auth::USER_HEADER,
    connection::ConnectionSettings,
    queue::memory_queue,
    repository::MemoryNotificationRepository,
    routes,
    state::AppState,
    test_utils::{RecordingTransport, wait_until},
};
use notify_shared::config::DeliveryConfig;
use serde_json::{Value, json};
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(2);

struct TestApp {
    router: Router,
    repository: Arc<MemoryNotificationRepository>,
    hub: Hub,
    pipeline: Pipeline,
}

fn app() -> TestApp {
    let (writer, reader) = memory_queue(64);
    let repository = Arc::new(MemoryNotificationRepository::new());
    let hub = Hub::spawn(&DeliveryConfig::default());
    let pipeline = Pipeline::start(
        reader,
        repository.clone(),
        hub.clone(),
        None,
        Duration::from_millis(10),
    );

    let state = AppState::new(
        Publisher::new(Arc::new(writer)),
        repository.clone(),
        hub.clone(),
        ConnectionSettings::default(),
    );

    TestApp {
        router: routes::api_routes().with_state(state),
        repository,
        hub,
        pipeline,
    }
}

async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, user: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(USER_HEADER, user)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_as(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(USER_HEADER, user)
        .body(Body::empty())
        .unwrap()
}

fn post_as(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(USER_HEADER, user)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_publish_then_list_and_mark_read() {
    let t = app();

    let (status, body) = call(
        &t.router,
        post_json("/notifications", "alice", json!({"receiver": "bob", "message": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["sender"], "alice");
    assert_eq!(body["data"]["receiver"], "bob");
    assert_eq!(body["data"]["read"], false);
    assert!(body["data"]["createdAt"].is_i64());
    let id = body["data"]["id"].as_str().unwrap().to_string();

    assert!(wait_until(WAIT, || t.repository.len() == 1).await);

    let (status, body) = call(&t.router, get_as("/notifications?unread=true", "bob")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["message"], "hi");

    // 只能看到自己的通知
    let (_, body) = call(&t.router, get_as("/notifications", "alice")).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = call(&t.router, post_as(&format!("/notifications/{id}/read"), "bob")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&t.router, get_as("/notifications?unread=true", "bob")).await;
    assert!(body["data"].as_array().unwrap().is_empty());
    let (_, body) = call(&t.router, get_as("/notifications", "bob")).await;
    assert_eq!(body["data"][0]["read"], true);

    t.pipeline.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_missing_identity_is_rejected() {
    let t = app();

    let request = Request::builder()
        .method("POST")
        .uri("/notifications")
        .header("content-type", "application/json")
        .body(Body::from(json!({"receiver": "bob", "message": "hi"}).to_string()))
        .unwrap();
    let (status, body) = call(&t.router, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert!(body["data"].is_null());
    assert!(t.repository.is_empty());

    t.pipeline.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_blank_fields_are_rejected() {
    let t = app();

    let (status, body) = call(
        &t.router,
        post_json("/notifications", "alice", json!({"receiver": " ", "message": "hi"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    t.pipeline.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_mark_read_errors() {
    let t = app();

    let (status, body) = call(&t.router, post_as("/notifications/not-a-uuid/read", "bob")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let unknown = uuid::Uuid::now_v7();
    let (status, body) =
        call(&t.router, post_as(&format!("/notifications/{unknown}/read"), "bob")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOTIFICATION_NOT_FOUND");

    t.pipeline.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_queue_failure_returns_service_unavailable() {
    let (writer, reader) = memory_queue(1);
    drop(reader);
    let repository = Arc::new(MemoryNotificationRepository::new());
    let hub = Hub::spawn(&DeliveryConfig::default());
    let state = AppState::new(
        Publisher::new(Arc::new(writer)),
        repository,
        hub.clone(),
        ConnectionSettings::default(),
    );
    let router = routes::api_routes().with_state(state);

    let (status, body) = call(
        &router,
        post_json("/notifications", "alice", json!({"receiver": "bob", "message": "hi"})),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "INGESTION_FAILED");

    hub.shutdown().await;
}

#[tokio::test]
async fn test_ws_status_reflects_hub_registry() {
    let t = app();

    let (status, body) = call(&t.router, get_as("/ws/status", "bob")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"], "bob");
    assert_eq!(body["data"]["connected"], false);
    assert_eq!(body["data"]["connectedUsers"], 0);

    let bob = RecordingTransport::new();
    t.hub.register("bob", bob.clone()).await;

    let (_, body) = call(&t.router, get_as("/ws/status", "bob")).await;
    assert_eq!(body["data"]["connected"], true);
    assert_eq!(body["data"]["connectedUsers"], 1);

    let (status, body) = call(&t.router, get_as("/ws/stats", "bob")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["evictions"], 0);

    t.pipeline.shutdown(WAIT).await;
    assert!(bob.is_closed());
}

#[tokio::test]
async fn test_ws_requires_identity() {
    let t = app();

    let request = Request::builder().uri("/ws").body(Body::empty()).unwrap();
    let (status, _) = call(&t.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    t.pipeline.shutdown(WAIT).await;
}

mod common;

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use common::{ScriptedExecutor, open_app, test_config};
use grabbox::api::{IDEMPOTENCY_HEADER, models::TaskAcceptedResponse, router};
use grabbox::app::App;
use grabbox::config::{ByteSize, Config};
use grabbox::task::{Task, TaskState};

/// Builds a test app with isolated dependencies. The worker pool is not
/// started, so admitted tasks stay QUEUED.
fn build_test_app(configure: impl FnOnce(&mut Config)) -> (App, Router, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = test_config(&temp_dir);
    configure(&mut config);

    let app = open_app(config, ScriptedExecutor::new());
    let router = router(app.state());
    (app, router, temp_dir)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("GET")
        .body(Body::empty())
        .unwrap()
}

fn download_body() -> Value {
    json!({
        "url": "https://example.com/watch?v=1",
        "format": "video",
        "quality": "720p"
    })
}

async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn accepted(response: Response) -> TaskAcceptedResponse {
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_download_accepted() {
    let (_app, router, _temp_dir) = build_test_app(|_| {});

    let response = router
        .oneshot(post_json("/download", download_body()))
        .await
        .unwrap();

    let task = accepted(response).await;
    assert!(!task.task_id.as_str().is_empty());
    assert_eq!(task.status, TaskState::Queued);
}

#[tokio::test]
async fn test_status_returns_task_record() {
    let (_app, router, _temp_dir) = build_test_app(|_| {});

    let response = router
        .clone()
        .oneshot(post_json("/download", download_body()))
        .await
        .unwrap();
    let task_id = accepted(response).await.task_id;

    let response = router
        .oneshot(get(&format!("/status/{task_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let task: Task = serde_json::from_slice(&body).unwrap();
    assert_eq!(task.id, task_id);
    assert_eq!(task.state, TaskState::Queued);
    assert_eq!(task.source_request.quality.as_deref(), Some("720p"));
    assert_eq!(task.resource_reservation, 1);
}

#[tokio::test]
async fn test_status_not_found() {
    let (_app, router, _temp_dir) = build_test_app(|_| {});

    let response = router.oneshot(get("/status/nonexistent")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_idempotency_key_returns_same_task() {
    let (app, router, _temp_dir) = build_test_app(|_| {});

    let request = || {
        Request::builder()
            .uri("/download")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .header(IDEMPOTENCY_HEADER, "retry-123")
            .body(Body::from(download_body().to_string()))
            .unwrap()
    };

    let first = accepted(router.clone().oneshot(request()).await.unwrap()).await;
    let second = accepted(router.oneshot(request()).await.unwrap()).await;

    assert_eq!(first.task_id, second.task_id);
    assert_eq!(app.state().store.stats().unwrap().task_count, 1);
}

#[tokio::test]
async fn test_invalid_content_type() {
    let (_app, router, _temp_dir) = build_test_app(|_| {});

    let request = Request::builder()
        .uri("/download")
        .method("POST")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(download_body().to_string()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json() {
    let (_app, router, _temp_dir) = build_test_app(|_| {});

    let request = Request::builder()
        .uri("/download")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"url\": "))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_validation_per_route() {
    let (app, router, _temp_dir) = build_test_app(|_| {});

    let missing_format = json!({"url": "https://example.com/watch?v=1"});
    let response = router
        .clone()
        .oneshot(post_json("/download", missing_format.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router
        .clone()
        .oneshot(post_json("/get_info", missing_format))
        .await
        .unwrap();
    accepted(response).await;

    let no_duration = json!({"url": "https://example.com/live", "format": "audio"});
    let response = router
        .clone()
        .oneshot(post_json("/live", no_duration))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let huge_window = json!({
        "url": "https://example.com/live",
        "format": "audio",
        "start": 1u64 << 63,
        "duration": 60
    });
    let response = router
        .clone()
        .oneshot(post_json("/live", huge_window))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bad_url = json!({"url": "file:///etc/passwd", "format": "video"});
    let response = router
        .oneshot(post_json("/download", bad_url))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(app.state().store.stats().unwrap().task_count, 1);
}

#[tokio::test]
async fn test_payload_too_large() {
    let (_app, router, _temp_dir) = build_test_app(|config| {
        config.server.max_payload_bytes = ByteSize(64);
    });

    let body = json!({
        "url": format!("https://example.com/watch?v={}", "x".repeat(128)),
        "format": "video"
    });
    let response = router.oneshot(post_json("/download", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_rate_limited_returns_429_with_retry_after() {
    let (app, router, _temp_dir) = build_test_app(|config| {
        config.rate_limit.max_requests = 1;
    });

    let response = router
        .clone()
        .oneshot(post_json("/download", download_body()))
        .await
        .unwrap();
    accepted(response).await;

    let response = router
        .oneshot(post_json("/download", download_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let body = json_body(response).await;
    assert_eq!(body["code"], "RATE_LIMITED");

    assert_eq!(app.state().store.stats().unwrap().task_count, 1);
}

#[tokio::test]
async fn test_quota_exceeded_returns_503() {
    let (app, router, _temp_dir) = build_test_app(|config| {
        config.quota.total_capacity = ByteSize(1);
    });

    let response = router
        .clone()
        .oneshot(post_json("/download", download_body()))
        .await
        .unwrap();
    accepted(response).await;

    let response = router
        .oneshot(post_json("/download", download_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["code"], "QUOTA_EXCEEDED");

    assert_eq!(app.state().scheduler.quota().reserved(), 1);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_app, router, _temp_dir) = build_test_app(|_| {});

    let response = router
        .clone()
        .oneshot(post_json("/download", download_body()))
        .await
        .unwrap();
    accepted(response).await;

    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = json_body(response).await;
    assert_eq!(health["status"], "healthy");
    assert!(health.get("version").is_some());
    assert_eq!(health["tasks"], 1);
    assert_eq!(health["quota"]["capacity"], 10);
    assert_eq!(health["quota"]["reserved"], 1);
    assert_eq!(health["quota"]["available"], 9);
    assert_eq!(health["pool"]["size"], 2);
    assert_eq!(health["counters"]["accepted"], 1);
}

#[tokio::test]
async fn test_files_rejects_escape_and_missing() {
    let (_app, router, _temp_dir) = build_test_app(|_| {});

    let response = router
        .clone()
        .oneshot(get("/files/abc/..%2F..%2Fsecret"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router.oneshot(get("/files/abc/missing.mp4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_files_filters_info_json() {
    let (app, router, _temp_dir) = build_test_app(|_| {});

    let dir = app.state().artifacts.download_dir().join("abc");
    std::fs::create_dir_all(&dir).unwrap();
    let info = json!({
        "title": "Example",
        "formats": [{"height": 720}, {"height": 360}, {"acodec": "opus"}]
    });
    std::fs::write(dir.join("info.json"), info.to_string()).unwrap();

    let response = router
        .clone()
        .oneshot(get("/files/abc/info.json?title&qualities"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"title": "Example", "qualities": ["360p", "720p"]})
    );

    let response = router
        .clone()
        .oneshot(get("/files/abc/info.json?uploader"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router.oneshot(get("/files/abc/info.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, info);
}

#[tokio::test]
async fn test_download_end_to_end() {
    let (app, router, _temp_dir) = build_test_app(|_| {});
    let background = app.start().await.unwrap();

    let response = router
        .clone()
        .oneshot(post_json("/download", download_body()))
        .await
        .unwrap();
    let task_id = accepted(response).await.task_id;

    let store = app.state().store;
    let task = common::wait_for_state(
        &store,
        &task_id,
        TaskState::Succeeded,
        Duration::from_secs(5),
    )
    .await;

    let status = json_body(
        router
            .clone()
            .oneshot(get(&format!("/status/{task_id}")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status["state"], "SUCCEEDED");
    assert_eq!(status["result"]["outcome"], "artifact");
    assert_eq!(status["result"]["location"], "local");

    let path = status["result"]["path"].as_str().unwrap().to_string();
    assert_eq!(path, format!("/files/{}/media.mp4", task.id));

    let response = router.oneshot(get(&path)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"not really an mp4");

    background.shutdown().await;
}

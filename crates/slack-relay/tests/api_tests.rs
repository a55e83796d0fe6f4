//! HTTP API integration tests.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

use slack_relay::api::{self, AppState};
use slack_relay::ws::HubConfig;

mod common;
use common::{RecordingGateway, connect, eventually, start_hub};

fn test_app(static_dir: &Path) -> (Router, slack_relay::ws::HubHandle) {
    let handle = start_hub(Arc::new(RecordingGateway::default()), HubConfig::default());
    let app = api::create_router(AppState::new(handle.clone(), static_dir));
    (app, handle)
}

fn ui_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<html>relay</html>").unwrap();
    fs::create_dir(dir.path().join("static")).unwrap();
    fs::write(dir.path().join("static").join("app.js"), "console.log('relay');").unwrap();
    dir
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = ui_dir();
    let (app, handle) = test_app(dir.path());
    let (_conn, _) = connect(&handle).await;
    assert!(eventually(|| handle.client_count() == 1).await);

    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["clients"], 1);
}

#[tokio::test]
async fn test_static_assets() {
    let dir = ui_dir();
    let (app, _handle) = test_app(dir.path());

    let (status, body) = get(app, "/static/app.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"console.log('relay');");
}

#[tokio::test]
async fn test_unknown_paths_serve_index() {
    let dir = ui_dir();
    let (app, _handle) = test_app(dir.path());

    let (status, body) = get(app.clone(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<html>relay</html>");

    let (status, body) = get(app, "/channels/general").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<html>relay</html>");
}

#[tokio::test]
async fn test_stream_requires_upgrade() {
    let dir = ui_dir();
    let (app, _handle) = test_app(dir.path());

    let (status, _) = get(app, "/stream").await;
    assert!(status.is_client_error(), "unexpected status {status}");
}

// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Integration tests for the bucketd HTTP API
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`. Remote downloads hit
//! a small axum origin server bound to an ephemeral port on 127.0.0.1, so no network
//! access is needed.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Redirect};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::time::timeout;
use tower::ServiceExt;

use bucketd::config::Config;
use bucketd::server::{build_router, AppState};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nnot-really-an-image";

// =============================================================================
// Helpers
// =============================================================================

/// Origin server the downloads are fetched from.
async fn spawn_origin() -> SocketAddr {
    let app = Router::new()
        .route(
            "/a.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], PNG_BYTES) }),
        )
        .route("/missing.png", get(|| async { StatusCode::NOT_FOUND }))
        .route("/empty.txt", get(|| async { "" }))
        .route(
            "/export",
            get(|| async {
                (
                    [(header::CONTENT_DISPOSITION, "attachment; filename=\"report.csv\"")],
                    "a,b\n1,2\n",
                )
            }),
        )
        .route("/slow.bin", get(slow_body))
        .route("/chunked.bin", get(chunked_body))
        .route("/", get(|| async { Redirect::temporary("/a.png") }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Never-ending body, one small chunk every 20ms, no length header.
async fn slow_body() -> Body {
    let chunks = futures_util::stream::unfold((), |()| async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Some((Ok::<_, std::io::Error>(Bytes::from_static(&[7u8; 256])), ()))
    });
    Body::from_stream(chunks)
}

const CHUNK_COUNT: usize = 10;
const CHUNK_LEN: usize = 1024;

/// Length-announced body sent in several delayed chunks.
async fn chunked_body() -> impl IntoResponse {
    let chunks = futures_util::stream::iter(0..CHUNK_COUNT).then(|_| async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok::<_, std::io::Error>(Bytes::from_static(&[3u8; CHUNK_LEN]))
    });
    (
        [(header::CONTENT_LENGTH, (CHUNK_COUNT * CHUNK_LEN).to_string())],
        Body::from_stream(chunks),
    )
}

fn test_app(dir: &TempDir) -> (Router, Arc<AppState>) {
    test_app_with(dir, |_| {})
}

fn test_app_with<F>(dir: &TempDir, customize: F) -> (Router, Arc<AppState>)
where
    F: FnOnce(&mut Config),
{
    let mut config = Config::default();
    config.storage_dir = dir.path().to_path_buf();
    config.use_system_proxy = false;
    config.progress_interval_secs = 1;
    customize(&mut config);

    let state = AppState::new(&config).unwrap();
    (build_router(Arc::clone(&state), &config), state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete_req(uri: &str) -> Request<Body> {
    Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn start(app: &Router, source: &str) -> String {
    let (status, json) = send(app, post_json("/downloads", json!({ "source": source }))).await;
    assert_eq!(status, StatusCode::OK, "start failed: {}", json);
    assert_eq!(json["success"], true);
    json["taskId"].as_str().unwrap().to_string()
}

async fn wait_for<F>(app: &Router, id: &str, done: F) -> Value
where
    F: Fn(&Value) -> bool,
{
    for _ in 0..300 {
        let (status, json) = send(app, get_req(&format!("/tasks/{}", id))).await;
        if status == StatusCode::OK && done(&json["task"]) {
            return json["task"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached the expected state", id);
}

async fn wait_terminal(app: &Router, id: &str) -> Value {
    wait_for(app, id, |task| task["status"] != "downloading").await
}

fn stored_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

// =============================================================================
// Start / Progress Tests
// =============================================================================

#[tokio::test]
async fn test_remote_download_success() {
    let origin = spawn_origin().await;
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);

    let id = start(&app, &format!("http://{}/a.png", origin)).await;
    let task = wait_terminal(&app, &id).await;

    assert_eq!(task["status"], "success");
    assert_eq!(task["fileName"], "a.png");
    assert_eq!(task["size"], PNG_BYTES.len());
    assert_eq!(task["downloadedBytes"], PNG_BYTES.len());
    assert_eq!(task["message"], "File downloaded successfully");
    assert!(task["previewUrl"].as_str().unwrap().ends_with("a.png?type=preview"));

    let (status, json) = send(&app, get_req("/downloads")).await;
    assert_eq!(status, StatusCode::OK);
    let files = json["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["name"], "a.png");
    assert_eq!(files[0]["size"], PNG_BYTES.len());
    assert!(files[0]["sizeFormatted"].as_str().unwrap().ends_with(" B"));
    assert!(files[0]["previewUrl"].as_str().unwrap().ends_with("a.png?type=preview"));
    assert_eq!(files[0]["downloadUrl"], "/downloads/a.png");
}

#[tokio::test]
async fn test_redirect_is_followed_and_names_the_file() {
    let origin = spawn_origin().await;
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);

    // The requested path has no usable segment, so the name comes from the final URL.
    let id = start(&app, &format!("http://{}/", origin)).await;
    let task = wait_terminal(&app, &id).await;

    assert_eq!(task["status"], "success", "{}", task);
    assert_eq!(task["fileName"], "a.png");
    assert_eq!(task["size"], PNG_BYTES.len());
    assert_eq!(std::fs::read(dir.path().join("a.png")).unwrap(), PNG_BYTES);
}

#[tokio::test]
async fn test_announced_length_progress_stays_bounded_and_monotonic() {
    let origin = spawn_origin().await;
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);
    let total = (CHUNK_COUNT * CHUNK_LEN) as u64;

    let id = start(&app, &format!("http://{}/chunked.bin", origin)).await;

    let mut last = 0u64;
    let mut partial_seen = false;
    let task = timeout(Duration::from_secs(10), async {
        loop {
            let (status, json) = send(&app, get_req(&format!("/tasks/{}", id))).await;
            assert_eq!(status, StatusCode::OK);
            let task = json["task"].clone();
            if task["status"] != "downloading" {
                return task;
            }

            let downloaded = task["downloadedBytes"].as_u64().unwrap();
            if task["fileName"] == "chunked.bin" {
                assert_eq!(task["totalBytes"].as_u64().unwrap(), total);
                assert!(downloaded <= total, "{} > {}", downloaded, total);
                if downloaded > 0 && downloaded < total {
                    partial_seen = true;
                }
            }
            assert!(downloaded >= last, "downloadedBytes went from {} to {}", last, downloaded);
            last = downloaded;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("download finished");

    assert!(partial_seen, "no mid-transfer progress was observed");
    assert_eq!(task["status"], "success", "{}", task);
    assert_eq!(task["size"].as_u64().unwrap(), total);
    assert_eq!(task["downloadedBytes"].as_u64().unwrap(), total);
    assert_eq!(task["totalBytes"].as_u64().unwrap(), total);
}

#[tokio::test]
async fn test_colliding_name_gets_suffix() {
    let origin = spawn_origin().await;
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);
    let url = format!("http://{}/a.png", origin);

    let first = start(&app, &url).await;
    assert_eq!(wait_terminal(&app, &first).await["fileName"], "a.png");

    let second = start(&app, &url).await;
    let task = wait_terminal(&app, &second).await;
    assert_eq!(task["status"], "success");
    assert_eq!(task["fileName"], "a (1).png");

    assert_eq!(stored_files(dir.path()), vec!["a (1).png", "a.png"]);
}

#[tokio::test]
async fn test_content_disposition_names_the_file() {
    let origin = spawn_origin().await;
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);

    let id = start(&app, &format!("http://{}/export", origin)).await;
    let task = wait_terminal(&app, &id).await;
    assert_eq!(task["fileName"], "report.csv");
}

#[tokio::test]
async fn test_inline_payload_download() {
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);

    let id = start(&app, "data:text/plain;base64,aGk=").await;
    let task = wait_terminal(&app, &id).await;

    assert_eq!(task["status"], "success");
    assert_eq!(task["size"], 2);
    assert_eq!(task["totalBytes"], 2);
    let name = task["fileName"].as_str().unwrap();
    assert!(name.ends_with(".txt"));
    assert_eq!(std::fs::read(dir.path().join(name)).unwrap(), b"hi");
}

#[tokio::test]
async fn test_http_error_is_recorded_without_file() {
    let origin = spawn_origin().await;
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);

    let id = start(&app, &format!("http://{}/missing.png", origin)).await;
    let task = wait_terminal(&app, &id).await;

    assert_eq!(task["status"], "error");
    assert!(task["message"].as_str().unwrap().contains("HTTP 404"));
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_empty_download_is_removed() {
    let origin = spawn_origin().await;
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);

    let id = start(&app, &format!("http://{}/empty.txt", origin)).await;
    let task = wait_terminal(&app, &id).await;

    assert_eq!(task["status"], "error");
    assert_eq!(task["message"], "Downloaded file is empty");
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_missing_source_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (app, state) = test_app(&dir);

    let (status, json) = send(&app, post_json("/downloads", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Missing source");

    let (status, _) = send(&app, post_json("/downloads", json!({ "source": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("POST")
        .uri("/downloads")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    assert!(state.manager.store().is_empty(), "no task is created for rejected requests");
}

#[tokio::test]
async fn test_oversized_body_is_rejected_with_413() {
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app_with(&dir, |config| config.max_body_bytes = 1024);

    let payload = format!("data:text/plain;base64,{}", "QUFB".repeat(1024));
    let (status, json) = send(&app, post_json("/downloads", json!({ "source": payload }))).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["success"], false);
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_finished_task_cannot_be_cancelled() {
    let dir = TempDir::new().unwrap();
    let (app, state) = test_app(&dir);

    let id = start(&app, "data:text/plain;base64,aGk=").await;
    assert_eq!(wait_terminal(&app, &id).await["status"], "success");

    let (status, json) = send(&app, post_json(&format!("/tasks/{}/cancel", id), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["success"], false);
    assert_eq!(state.manager.active_count(), 0);
}

#[tokio::test]
async fn test_url_alias_is_accepted() {
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);

    let (status, json) = send(&app, post_json("/downloads", json!({ "url": "data:,hello" }))).await;
    assert_eq!(status, StatusCode::OK);
    let id = json["taskId"].as_str().unwrap();
    assert_eq!(wait_terminal(&app, id).await["size"], 5);
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);

    let (status, json) = send(&app, get_req("/tasks/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);

    let (status, _) = send(&app, post_json("/tasks/does-not-exist/cancel", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Artifact Tests
// =============================================================================

#[tokio::test]
async fn test_get_artifact_modes() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("note.txt"), "hello").unwrap();
    let (app, _state) = test_app(&dir);

    let response = app.clone().oneshot(get_req("/downloads/note.txt")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/plain"));
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"note.txt\""));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"hello");

    let response = app.clone().oneshot(get_req("/downloads/note.txt?type=preview")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());

    let (status, json) = send(&app, get_req("/downloads/nope.txt")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_delete_artifact() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("keep.txt"), "1").unwrap();
    std::fs::write(dir.path().join("drop me.txt"), "2").unwrap();
    let (app, _state) = test_app(&dir);

    let (status, json) = send(&app, delete_req("/downloads/drop%20me.txt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(stored_files(dir.path()), vec!["keep.txt"]);

    let (status, json) = send(&app, delete_req("/downloads/drop%20me.txt")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(stored_files(dir.path()), vec!["keep.txt"]);
}

#[tokio::test]
async fn test_invalid_names_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);

    let (status, _) = send(&app, delete_req("/downloads/..%2Fsecret")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get_req("/downloads/..%5Csecret")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&app, delete_req("/downloads/")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "File name is required");
}

#[tokio::test]
async fn test_listing_sorted_newest_first() {
    let dir = TempDir::new().unwrap();
    let old = dir.path().join("old.txt");
    std::fs::write(&old, "old").unwrap();
    let file = std::fs::File::options().write(true).open(&old).unwrap();
    file.set_modified(std::time::SystemTime::now() - Duration::from_secs(600)).unwrap();
    std::fs::write(dir.path().join("new.txt"), "new").unwrap();
    let (app, _state) = test_app(&dir);

    let (_, json) = send(&app, get_req("/downloads")).await;
    let names: Vec<&str> = json["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["new.txt", "old.txt"]);
}

// =============================================================================
// In-flight Tests
// =============================================================================

#[tokio::test]
async fn test_in_flight_download_is_hidden_protected_and_cancellable() {
    let origin = spawn_origin().await;
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);

    let id = start(&app, &format!("http://{}/slow.bin", origin)).await;
    let task = wait_for(&app, &id, |task| task["downloadedBytes"].as_u64().unwrap_or(0) > 0).await;
    assert_eq!(task["status"], "downloading");
    assert_eq!(task["fileName"], "slow.bin");
    assert_eq!(task["totalBytes"], 0);

    // On disk, but not listed.
    assert_eq!(stored_files(dir.path()), vec!["slow.bin"]);
    let (_, json) = send(&app, get_req("/downloads")).await;
    assert!(json["files"].as_array().unwrap().is_empty());

    let (status, _) = send(&app, delete_req("/downloads/slow.bin")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = send(&app, post_json(&format!("/tasks/{}/cancel", id), json!({}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["success"], true);

    let task = wait_terminal(&app, &id).await;
    assert_eq!(task["status"], "error");
    assert_eq!(task["message"], "Download cancelled");
    assert!(stored_files(dir.path()).is_empty(), "partial file is removed");

    let (status, _) = send(&app, post_json(&format!("/tasks/{}/cancel", id), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// =============================================================================
// Progress Stream Tests
// =============================================================================

async fn first_frame(app: &Router) -> String {
    let response = app.clone().oneshot(get_req("/progress")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut body = response.into_body().into_data_stream();
    let frame = timeout(Duration::from_secs(2), body.next())
        .await
        .expect("first event should be sent on connect")
        .expect("stream open")
        .unwrap();
    String::from_utf8(frame.to_vec()).unwrap()
}

#[tokio::test]
async fn test_progress_stream_sends_empty_snapshot_on_connect() {
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);

    let frame = first_frame(&app).await;
    assert!(frame.contains("event: progress"));
    assert!(frame.contains("data: {}"));
}

#[tokio::test]
async fn test_progress_stream_lists_in_flight_tasks() {
    let origin = spawn_origin().await;
    let dir = TempDir::new().unwrap();
    let (app, state) = test_app(&dir);

    let id = start(&app, &format!("http://{}/slow.bin", origin)).await;
    wait_for(&app, &id, |task| task["fileName"] == "slow.bin").await;

    let frame = first_frame(&app).await;
    let data = frame
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .expect("data line");
    let snapshot: Value = serde_json::from_str(data).unwrap();
    assert_eq!(snapshot[&id]["status"], "downloading");
    assert_eq!(snapshot[&id]["fileName"], "slow.bin");

    assert!(state.manager.shutdown(Duration::from_secs(2)).await);
    assert_eq!(wait_terminal(&app, &id).await["message"], "Download cancelled");
}

#[tokio::test]
async fn test_root_liveness() {
    let dir = TempDir::new().unwrap();
    let (app, _state) = test_app(&dir);

    let response = app.clone().oneshot(get_req("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"bucketd is running");
}

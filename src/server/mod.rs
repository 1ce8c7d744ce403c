// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! API server
//!
//! Thin HTTP layer over the download subsystem and the storage directory.
//!
//! # Endpoints
//!
//! - `GET /` - Liveness
//! - `POST /downloads` - Start a download (`{ "source": "<url or data URI>" }`)
//! - `GET /downloads` - List stored artifacts, newest first
//! - `GET /downloads/:name` - Fetch an artifact (`?type=preview` to view inline)
//! - `DELETE /downloads/:name` - Delete an artifact
//! - `GET /progress` - Server-sent `progress` events with in-flight tasks
//! - `GET /tasks/:id` - Current record of one task
//! - `POST /tasks/:id/cancel` - Cancel a running task
//!
//! # Example
//!
//! ```no_run
//! use bucketd::config::Config;
//! use bucketd::server::Server;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let server = Server::new(Config::default());
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::download::{DownloadManager, ProgressBroadcaster, ProgressRecord, ProgressStore, TaskId};
use crate::errors::{map_io_error, ApiError, ApiResult};
use crate::media::content_type_for;
use crate::storage::{is_plain_file_name, FileInfo, Storage};

/// How long shutdown waits for cancelled transfers to record their final state.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server state shared across handlers.
#[derive(Debug)]
pub struct AppState {
    pub manager: DownloadManager,
    pub broadcaster: ProgressBroadcaster,
}

impl AppState {
    /// Wire the download subsystem up from `config`. Nothing is spawned.
    pub fn new(config: &Config) -> Result<Arc<Self>> {
        let store = Arc::new(ProgressStore::new(config.retention_policy()));
        let storage = Storage::new(&config.storage_dir);
        let manager = DownloadManager::new(storage, Arc::clone(&store), &config.transfer_settings())?;
        let broadcaster = ProgressBroadcaster::new(store, config.progress_interval());
        Ok(Arc::new(Self { manager, broadcaster }))
    }

    fn storage(&self) -> &Storage {
        self.manager.storage()
    }

    fn store(&self) -> &ProgressStore {
        self.manager.store()
    }
}

/// Build the router with all routes and middleware.
pub fn build_router(state: Arc<AppState>, config: &Config) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/downloads", post(start_download_handler).get(list_handler))
        .route("/downloads/", get(missing_name_handler).delete(missing_name_handler))
        .route("/downloads/:name", get(artifact_handler).delete(delete_handler))
        .route("/progress", get(progress_handler))
        .route("/tasks/:id", get(task_handler))
        .route("/tasks/:id/cancel", post(cancel_handler))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}

/// API server.
#[derive(Debug)]
pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the server and run until SIGINT/SIGTERM, then cancel in-flight downloads.
    pub async fn start(&self) -> Result<()> {
        self.config.validate()?;
        let state = AppState::new(&self.config)?;

        state.storage().ensure_exists().await.map_err(|e| {
            anyhow::anyhow!("Failed to create storage directory {}: {}", self.config.storage_dir.display(), e)
        })?;
        let sweeper = state.manager.spawn_retention_sweeper(self.config.sweep_interval());

        let router = build_router(Arc::clone(&state), &self.config);
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);

        tracing::info!(
            storage = %self.config.storage_dir.display(),
            "Starting server on {}",
            addr
        );

        // Security warning if binding to all interfaces
        if self.config.bind_address == "0.0.0.0" {
            tracing::warn!(
                "Server is binding to 0.0.0.0 which exposes the API to the network. \
                Use 127.0.0.1 (default) for local-only access."
            );
        }

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. \
                    Another bucketd may be running; stop it or pass a different --port.",
                    self.config.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        // Progress streams end on the shutdown token, otherwise graceful shutdown
        // would wait on them forever.
        let shutdown = state.manager.shutdown_token();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                shutdown.cancel();
            })
            .await?;

        state.manager.shutdown(SHUTDOWN_GRACE).await;
        sweeper.abort();
        tracing::info!("Cleanup complete, shutting down server");
        Ok(())
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StartRequest {
    #[serde(default, alias = "url")]
    source: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    success: bool,
    task_id: TaskId,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    success: bool,
    files: Vec<FileInfo>,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    success: bool,
    message: String,
}

#[derive(Debug, Serialize)]
struct TaskResponse {
    success: bool,
    task: ProgressRecord,
}

/// `?type=preview` (or `?mode=preview`) serves inline; anything else is an attachment.
#[derive(Debug, Default, Deserialize)]
struct ArtifactQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    mode: Option<String>,
}

impl ArtifactQuery {
    fn is_preview(&self) -> bool {
        self.kind
            .as_deref()
            .or(self.mode.as_deref())
            .is_some_and(|m| m.eq_ignore_ascii_case("preview"))
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn root_handler() -> &'static str {
    "bucketd is running"
}

async fn start_download_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> ApiResult<Json<StartResponse>> {
    let Json(request) = body.map_err(|e| {
        let message = format!("Invalid request body: {}", e.body_text());
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::payload_too_large(message)
        } else {
            ApiError::bad_request(message)
        }
    })?;
    let source = request.source.unwrap_or_default();

    let task_id = state.manager.start(&source)?;
    Ok(Json(StartResponse { success: true, task_id }))
}

async fn list_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<ListResponse>> {
    let in_flight = state.store().in_flight_names();
    let files = state
        .storage()
        .list(&in_flight)
        .await
        .map_err(|e| ApiError::internal(&format!("Error reading storage directory: {}", e)))?;
    Ok(Json(ListResponse { success: true, files }))
}

async fn missing_name_handler() -> ApiError {
    ApiError::bad_request("File name is required")
}

fn checked_name(name: &str) -> ApiResult<()> {
    if is_plain_file_name(name) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!("Invalid file name: {}", name)))
    }
}

async fn artifact_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<ArtifactQuery>,
) -> ApiResult<Response> {
    checked_name(&name)?;
    // Still being written: not an artifact yet.
    if state.store().in_flight_names().contains(&name) {
        return Err(ApiError::not_found(format!("File not found: {}", name)));
    }

    let (file, metadata) = state
        .storage()
        .open(&name)
        .await
        .map_err(|e| map_io_error(&name, &e))?
        .ok_or_else(|| ApiError::not_found(format!("File not found: {}", name)))?;

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&name)));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if !query.is_preview() {
        headers.insert(header::CONTENT_DISPOSITION, attachment_header(&name));
    }
    Ok(response)
}

/// `attachment; filename="<ascii fallback>"; filename*=UTF-8''<encoded>`
fn attachment_header(name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            ' ' => ' ',
            c if c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(name)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    checked_name(&name)?;
    if state.store().in_flight_names().contains(&name) {
        return Err(ApiError::conflict(format!("File is still downloading: {}", name)));
    }

    let deleted = state
        .storage()
        .delete(&name)
        .await
        .map_err(|e| map_io_error(&name, &e))?;
    if !deleted {
        return Err(ApiError::not_found(format!("File not found: {}", name)));
    }

    tracing::info!(file = %name, "Artifact deleted");
    Ok(Json(MessageResponse {
        success: true,
        message: "File deleted successfully".to_string(),
    }))
}

async fn progress_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let shutdown = state.manager.shutdown_token();
    let stream = state
        .broadcaster
        .subscribe()
        .take_until(shutdown.cancelled_owned())
        .map(|snapshot| Event::default().event("progress").json_data(snapshot));
    Sse::new(stream)
}

async fn task_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskResponse>> {
    let record = state
        .store()
        .get(&TaskId::from(id.as_str()))
        .ok_or_else(|| ApiError::not_found(format!("Task not found: {}", id)))?;
    Ok(Json(TaskResponse {
        success: true,
        task: (*record).clone(),
    }))
}

async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let task_id = TaskId::from(id.as_str());
    if state.manager.cancel(&task_id) {
        return Ok((
            StatusCode::ACCEPTED,
            Json(MessageResponse {
                success: true,
                message: "Cancellation requested".to_string(),
            }),
        ));
    }

    match state.store().get(&task_id) {
        Some(_) => Err(ApiError::conflict(format!("Task already finished: {}", id))),
        None => Err(ApiError::not_found(format!("Task not found: {}", id))),
    }
}

/// Graceful shutdown signal handler.
///
/// Waits for SIGINT/SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("Failed to install signal handlers: {}", e);
                std::future::pending::<()>().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }
}

//! HTTP route handlers for the task document and progress log.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::document::TaskDocument;
use crate::runner::RunnerSupervisor;
use crate::store::{DocumentStore, StoreError};
use crate::validate::{validate_document, Strictness};

use super::runner as runner_api;
use super::{api_error, ApiError};

/// Cap on the PUT /api/tasks body. Anything larger is rejected up front
/// rather than buffered.
const MAX_DOCUMENT_BYTES: usize = 2 * 1024 * 1024;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: DocumentStore,
    /// The single process-wide runner
    pub runner: Arc<RunnerSupervisor>,
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = DocumentStore::new(config.tasks_path.clone(), config.progress_path.clone());
    let runner = Arc::new(RunnerSupervisor::new());

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        runner,
    });

    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Watching task document at {}", config.tasks_path.display());

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(shutdown_state).await;
        })
        .await?;

    Ok(())
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/tasks", get(get_tasks).put(put_tasks))
        .route("/api/progress", get(get_progress))
        .route("/api/runner/status", get(runner_api::status))
        .route("/api/runner/logs", get(runner_api::logs))
        .route("/api/runner/start", post(runner_api::start))
        .route("/api/runner/stop", post(runner_api::stop))
        .layer(DefaultBodyLimit::max(MAX_DOCUMENT_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wait for a shutdown signal, stopping any active runner on the way out.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");

    if state.runner.status().await.running {
        tracing::info!("Stopping active runner before exit");
        let _ = state.runner.stop().await;
    }
}

/// Health check endpoint.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Read the task document from disk.
async fn get_tasks(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let document = state.store.read_document().await.map_err(store_error)?;
    Ok(Json(document))
}

/// Validate and write a full task document.
async fn put_tasks(
    State(state): State<Arc<AppState>>,
    Json(candidate): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    validate_document(&candidate, Strictness::Save)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    let document: TaskDocument = serde_json::from_value(candidate)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid task document: {}", e)))?;

    state.store.write_document(&document).await.map_err(store_error)?;

    tracing::debug!("Task document saved ({} branches)", document.len());
    Ok(Json(json!({ "ok": true })))
}

/// Read the progress log as raw text.
async fn get_progress(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    state.store.read_progress().await.map_err(store_error)
}

fn store_error(e: StoreError) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e)
}

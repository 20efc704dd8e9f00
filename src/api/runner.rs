//! Runner control endpoints and the live log stream.
//!
//! `GET /api/runner/logs` is a long-lived SSE stream: on connect the client
//! receives one `status` event and the buffered log backlog, then live
//! `status`/`log` events until it disconnects. Each subscriber is fed from
//! its own broadcast receiver, so a slow consumer never blocks the others.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::runner::{LogLine, RunnerError, RunnerEvent, RunnerStatus};

use super::routes::AppState;
use super::{api_error, ApiError};

/// Request body for starting the runner.
#[derive(Debug, Deserialize)]
pub struct StartRunnerRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

/// Current runner status.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<RunnerStatus> {
    Json(state.runner.status().await)
}

/// Launch the runner process.
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRunnerRequest>,
) -> Result<Json<Value>, ApiError> {
    Arc::clone(&state.runner)
        .start(&req.command, &req.args, req.cwd)
        .await
        .map_err(runner_error)?;
    Ok(Json(json!({ "ok": true })))
}

/// Request termination of the runner process.
pub async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    state.runner.stop().await.map_err(runner_error)?;
    Ok(Json(json!({ "ok": true })))
}

/// Subscribe to runner status and log events.
pub async fn logs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (current, backlog, mut rx) = state.runner.subscribe().await;

    let stream = async_stream::stream! {
        if let Some(event) = status_event(&current) {
            yield Ok(event);
        }
        for line in backlog {
            if let Some(event) = log_event(line) {
                yield Ok(event);
            }
        }
        loop {
            match rx.recv().await {
                Ok(RunnerEvent::Status(status)) => {
                    if let Some(event) = status_event(&status) {
                        yield Ok(event);
                    }
                }
                Ok(RunnerEvent::Log(line)) => {
                    if let Some(event) = log_event(line) {
                        yield Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Log subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn status_event(status: &RunnerStatus) -> Option<Event> {
    Event::default().event("status").json_data(status).ok()
}

fn log_event(line: String) -> Option<Event> {
    Event::default()
        .event("log")
        .json_data(&LogLine { line })
        .ok()
}

fn runner_error(e: RunnerError) -> ApiError {
    api_error(StatusCode::CONFLICT, e)
}

//! HTTP API surface.

pub mod routes;
pub mod runner;

pub use routes::{serve, AppState};

use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};

/// Error shape shared by every endpoint: a status code plus `{"error": ...}`.
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl ToString) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

//! JSON API consumed by the dashboard and by the messaging bridge

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use crate::downloader::ControlError;
use crate::router::AppState;

pub mod downloads;
pub mod inbound;

/// Body of every failed API call
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        status: "error",
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match self {
            ControlError::MissingTarget => StatusCode::BAD_REQUEST,
            ControlError::NoSuchEntry(_)
            | ControlError::NoSuchTask(_)
            | ControlError::IndexOutOfRange(_) => StatusCode::NOT_FOUND,
            ControlError::NotRetryable { .. } | ControlError::NoSource(_) => StatusCode::CONFLICT,
        };
        tracing::debug!(status = %status, error = %self, "Control request rejected");
        error_response(status, self.to_string())
    }
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/downloads", get(downloads::list_downloads))
        .route("/downloads/stats", get(downloads::download_stats))
        .route("/downloads/{id}", get(downloads::get_download))
        .route("/retry", post(downloads::retry_download))
        .route("/stop", post(downloads::stop_download))
        .route("/delete", post(downloads::delete_download))
        .route("/inbound", post(inbound::accept_inbound))
}

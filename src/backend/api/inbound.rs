//! Entry point for "new file available" events from the messaging bridge

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::error_response;
use crate::downloader::InboundFile;
use crate::router::AppState;

#[derive(Debug, Serialize)]
pub struct Queued {
    pub status: &'static str,
    pub id: String,
}

pub async fn accept_inbound(
    State(state): State<AppState>,
    Json(event): Json<InboundFile>,
) -> Response {
    if let Err(e) = url::Url::parse(&event.url) {
        tracing::warn!(url = %event.url, error = %e, "Rejecting inbound file with invalid URL");
        return error_response(StatusCode::BAD_REQUEST, format!("Invalid URL: {e}"));
    }

    let id = state.queue.accept(event).await;
    (
        StatusCode::ACCEPTED,
        Json(Queued {
            status: "queued",
            id,
        }),
    )
        .into_response()
}

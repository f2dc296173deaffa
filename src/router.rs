use axum::{Router, http::StatusCode};
use tower_http::trace::TraceLayer;

use crate::backend::api::{api_router, error_response};
use crate::downloader::DownloadQueue;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub queue: DownloadQueue,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_router())
        .fallback(|| async { error_response(StatusCode::NOT_FOUND, "Not Found") })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::testing::{RecordingNotifier, ScriptedFetcher, Step};
    use crate::downloader::{QueueSettings, SnapshotStore, TransferEntry, TransferStatus};
    use axum::{
        body::{Body, to_bytes},
        http::{Request, header},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const RETRY_URL: &str = "https://files.example.com/b.bin";

    /// A router over a restored registry of one done, one failed (retryable)
    /// and one stopped entry without a locator
    async fn app() -> (TempDir, DownloadQueue, Router) {
        let dir = TempDir::new().unwrap();

        let mut done = TransferEntry::new("a.bin");
        done.status = TransferStatus::Done;
        done.downloaded_bytes = 1024;
        done.total_bytes = 1024;
        let mut failed = TransferEntry::new("b.bin");
        failed.status = TransferStatus::Failed;
        failed.source_url = Some(RETRY_URL.into());
        failed.last_error = Some("Attempt 6/6 failed: timeout".into());
        let mut stopped = TransferEntry::new("c.bin");
        stopped.status = TransferStatus::Stopped;

        let store = SnapshotStore::new(dir.path().join("downloads.json"));
        store.save_with(|| vec![done, failed, stopped]).await.unwrap();

        let fetcher = ScriptedFetcher::default().script(RETRY_URL, &[Step::Hang]);
        let queue = DownloadQueue::new(
            store,
            Arc::new(fetcher),
            Arc::new(RecordingNotifier::default()),
            QueueSettings::new(dir.path().join("downloads")),
        );
        queue.restore().await;

        let router = create_router(AppState {
            queue: queue.clone(),
        });
        (dir, queue, router)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn lists_entries_with_totals() {
        let (_dir, _queue, router) = app().await;

        let (status, body) = call(&router, "GET", "/api/downloads", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["downloads"].as_array().unwrap().len(), 3);
        assert_eq!(body["totals"]["count"], 3);
        assert_eq!(body["totals"]["done"], 1);
        assert_eq!(body["totals"]["downloaded_bytes"], 1024);
        assert_eq!(body["downloads"][0]["eta"], "-");

        let (_, body) = call(&router, "GET", "/api/downloads?search=B.B", None).await;
        let downloads = body["downloads"].as_array().unwrap();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0]["id"], "b.bin");
        assert_eq!(downloads[0]["status"], "failed");
    }

    #[tokio::test]
    async fn stats_and_single_entry() {
        let (_dir, _queue, router) = app().await;

        let (status, body) = call(&router, "GET", "/api/downloads/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["stopped"], 1);

        let (status, body) = call(&router, "GET", "/api/downloads/a.bin", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "done");

        let (status, body) = call(&router, "GET", "/api/downloads/nope.bin", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn retry_reports_failures_without_side_effects() {
        let (_dir, queue, router) = app().await;
        let before = queue.snapshot();

        let (status, body) = call(&router, "POST", "/api/retry", Some(json!({ "index": 99 }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("99"));

        let (status, _) = call(&router, "POST", "/api/retry", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&router, "POST", "/api/retry", Some(json!({ "id": "a.bin" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&router, "POST", "/api/retry", Some(json!({ "file": "c.bin" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        assert_eq!(queue.snapshot(), before);
    }

    #[tokio::test]
    async fn retry_stop_and_delete_flow() {
        let (_dir, queue, router) = app().await;

        // b.bin is at index 1, newest first
        let (status, body) = call(&router, "POST", "/api/retry", Some(json!({ "index": 1 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
        let entry = queue.get("b.bin").unwrap();
        assert_eq!(entry.status, TransferStatus::Downloading);
        assert!(entry.last_error.is_none());

        let (status, body) = call(&router, "POST", "/api/stop", Some(json!({ "file": "b.bin" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "stopped" }));

        let (status, _) = call(&router, "POST", "/api/stop", Some(json!({ "id": "a.bin" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&router, "POST", "/api/delete", Some(json!({ "id": "a.bin" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "deleted" }));

        let (status, _) = call(&router, "POST", "/api/delete", Some(json!({ "id": "a.bin" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(queue.get("a.bin").is_none());
    }

    #[tokio::test]
    async fn inbound_files_are_queued() {
        let (_dir, queue, router) = app().await;

        let (status, body) = call(
            &router,
            "POST",
            "/api/inbound",
            Some(json!({ "url": "https://files.example.com/report.pdf" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({ "status": "queued", "id": "report.pdf" }));

        let entry = queue.get("report.pdf").unwrap();
        assert_eq!(entry.mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(queue.id_at(0), Ok("report.pdf".to_string()));

        let (status, body) = call(&router, "POST", "/api/inbound", Some(json!({ "url": "not a url" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn unknown_routes_are_json_errors() {
        let (_dir, _queue, router) = app().await;
        let (status, body) = call(&router, "GET", "/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Not Found");
    }
}

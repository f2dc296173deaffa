//! Download list and control API

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};

use crate::downloader::{ControlError, DownloadQueue, TransferEntry, TransferStatus};
use crate::router::AppState;
use crate::util::{format_eta, human_size};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Case-insensitive substring of the file name
    #[serde(default)]
    pub search: Option<String>,
}

/// Aggregates over the listed entries
#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct DownloadTotals {
    pub done: usize,
    pub count: usize,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub pending_bytes: u64,
    pub speed_kbps: f64,
    pub downloaded_human: String,
    pub total_human: String,
    pub pending_human: String,
}

impl DownloadTotals {
    pub fn from_entries(entries: &[TransferEntry]) -> Self {
        let mut totals = entries.iter().fold(Self::default(), |mut totals, entry| {
            totals.count += 1;
            if entry.status == TransferStatus::Done {
                totals.done += 1;
            }
            totals.downloaded_bytes += entry.downloaded_bytes;
            totals.total_bytes += entry.total_bytes;
            totals.pending_bytes += entry.remaining_bytes();
            totals.speed_kbps += entry.speed_kbps;
            totals
        });

        totals.speed_kbps = (totals.speed_kbps * 10.0).round() / 10.0;
        totals.downloaded_human = human_size(totals.downloaded_bytes);
        totals.total_human = human_size(totals.total_bytes);
        totals.pending_human = human_size(totals.pending_bytes);
        totals
    }
}

/// An entry with display renderings of its numbers
#[derive(Debug, Serialize)]
pub struct DownloadView {
    #[serde(flatten)]
    pub entry: TransferEntry,
    pub downloaded_human: String,
    pub total_human: String,
    pub eta: String,
}

impl From<TransferEntry> for DownloadView {
    fn from(entry: TransferEntry) -> Self {
        Self {
            downloaded_human: human_size(entry.downloaded_bytes),
            total_human: human_size(entry.total_bytes),
            eta: format_eta(entry.pending_seconds),
            entry,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DownloadList {
    pub downloads: Vec<DownloadView>,
    pub totals: DownloadTotals,
}

#[derive(Debug, Default, Serialize)]
pub struct DownloadStats {
    #[serde(flatten)]
    pub totals: DownloadTotals,
    pub downloading: usize,
    pub failed: usize,
    pub stopped: usize,
}

/// Filters by name and moves running transfers to the top, keeping
/// registry order otherwise
pub fn filter_and_sort(entries: Vec<TransferEntry>, search: Option<&str>) -> Vec<TransferEntry> {
    let needle = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut entries: Vec<_> = entries
        .into_iter()
        .filter(|entry| {
            needle
                .as_deref()
                .is_none_or(|needle| entry.id.to_lowercase().contains(needle))
        })
        .collect();

    entries.sort_by_key(|entry| entry.status != TransferStatus::Downloading);
    entries
}

pub async fn list_downloads(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<DownloadList> {
    let entries = filter_and_sort(state.queue.snapshot(), query.search.as_deref());
    let totals = DownloadTotals::from_entries(&entries);

    Json(DownloadList {
        downloads: entries.into_iter().map(DownloadView::from).collect(),
        totals,
    })
}

pub async fn download_stats(State(state): State<AppState>) -> Json<DownloadStats> {
    let entries = state.queue.snapshot();
    let mut stats = DownloadStats {
        totals: DownloadTotals::from_entries(&entries),
        ..Default::default()
    };

    for entry in &entries {
        match entry.status {
            TransferStatus::Downloading => stats.downloading += 1,
            TransferStatus::Failed => stats.failed += 1,
            TransferStatus::Stopped => stats.stopped += 1,
            TransferStatus::Done => {}
        }
    }

    Json(stats)
}

pub async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DownloadView>, ControlError> {
    state
        .queue
        .get(&id)
        .map(|entry| Json(entry.into()))
        .ok_or(ControlError::NoSuchEntry(id))
}

/// Names an entry by id (`file` in older clients) or by list position
#[derive(Debug, Default, Deserialize)]
pub struct ControlRequest {
    #[serde(default, alias = "file")]
    pub id: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
}

impl ControlRequest {
    fn resolve(&self, queue: &DownloadQueue) -> Result<String, ControlError> {
        match (&self.id, self.index) {
            (Some(id), _) => Ok(id.clone()),
            (None, Some(index)) => queue.id_at(index),
            (None, None) => Err(ControlError::MissingTarget),
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Ack {
    pub status: &'static str,
}

pub async fn retry_download(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<Ack>, ControlError> {
    let id = request.resolve(&state.queue)?;
    state.queue.retry(&id).await?;
    Ok(Json(Ack { status: "ok" }))
}

pub async fn stop_download(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<Ack>, ControlError> {
    let id = request.resolve(&state.queue)?;
    state.queue.stop(&id)?;
    Ok(Json(Ack { status: "stopped" }))
}

pub async fn delete_download(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<Ack>, ControlError> {
    let id = request.resolve(&state.queue)?;
    state.queue.delete(&id).await?;
    Ok(Json(Ack { status: "deleted" }))
}

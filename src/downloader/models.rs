//! Data structures for the transfer manager
//!
//! This file contains the core data types shared by the registry, the
//! persistence layer, the transfer units and the HTTP API.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt, path::PathBuf};

/// Status of a tracked transfer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// A unit is currently running for this entry
    #[default]
    Downloading,
    /// Transfer completed successfully
    Done,
    /// All attempts were exhausted
    Failed,
    /// Transfer was cancelled by an operator
    Stopped,
}

impl TransferStatus {
    /// Terminal states that an explicit retry may restart
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Downloading => write!(f, "downloading"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Media kind of an inbound file, decides the destination subdirectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Document,
}

impl MediaKind {
    /// Classify by content-type prefix, anything unknown is a document
    pub fn from_mime(mime_type: Option<&str>) -> Self {
        match mime_type {
            Some(mime) if mime.starts_with("image/") => Self::Image,
            Some(mime) if mime.starts_with("video/") => Self::Video,
            _ => Self::Document,
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Image => "Images",
            Self::Video => "Videos",
            Self::Document => "Documents",
        }
    }
}

/// Opaque handle to an external status message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageRef {
    Id(i64),
    Key(String),
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Key(key) => f.write_str(key),
        }
    }
}

/// One tracked transfer.
///
/// Older snapshots used different field names; those are accepted as aliases
/// so existing state files keep loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferEntry {
    /// Stable key, the destination file name
    #[serde(alias = "file")]
    pub id: String,
    #[serde(default)]
    pub status: TransferStatus,
    #[serde(default, alias = "progress")]
    pub progress_percent: f64,
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default, alias = "speed")]
    pub speed_kbps: f64,
    /// Estimated seconds until completion, absent when the speed is unknown
    #[serde(default, alias = "pending_time")]
    pub pending_seconds: Option<f64>,
    #[serde(default, alias = "error")]
    pub last_error: Option<String>,
    #[serde(
        default = "Utc::now",
        alias = "timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub created_at: DateTime<Utc>,
    #[serde(default, alias = "_status_msg_id")]
    pub status_message_ref: Option<MessageRef>,
    /// Where the bytes come from, needed to retry after the inbound event is gone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl TransferEntry {
    /// Creates a fresh `downloading` entry with zeroed counters
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TransferStatus::Downloading,
            progress_percent: 0.0,
            downloaded_bytes: 0,
            total_bytes: 0,
            speed_kbps: 0.0,
            pending_seconds: None,
            last_error: None,
            created_at: Utc::now(),
            status_message_ref: None,
            source_url: None,
            mime_type: None,
            path: None,
        }
    }

    /// Re-enter `downloading` after an explicit retry.
    ///
    /// Byte counters are left alone, the next progress sample overwrites them.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) {
        self.status = TransferStatus::Downloading;
        self.progress_percent = 0.0;
        self.speed_kbps = 0.0;
        self.pending_seconds = None;
        self.last_error = None;
        self.created_at = now;
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.downloaded_bytes)
    }
}

/// Accepts RFC 3339 timestamps as well as naive ISO timestamps (taken as UTC)
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// A raw byte-count callback from a fetcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub current: u64,
    /// Zero while the size is still unknown
    pub total: u64,
}

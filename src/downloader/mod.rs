//! Transfer manager: tracks files announced by the messaging channel,
//! downloads them concurrently with retries, and keeps a durable snapshot.

mod http;
mod models;
mod notify;
mod progress;
mod queue;
mod registry;
mod source;
mod store;
#[cfg(test)]
pub(crate) mod testing;
mod worker;

use thiserror::Error;

// Re-export the public API
pub use http::HttpFetcher;
pub use models::{TransferEntry, TransferStatus};
pub use notify::LogNotifier;
pub use queue::{DownloadQueue, QueueSettings};
pub use source::InboundFile;
pub use store::SnapshotStore;
pub use worker::{Backoff, RetryPolicy};

/// Failure of a single transfer attempt
#[derive(Debug, Error)]
pub enum TransferError {
    /// The unit was asked to stop; not a failure
    #[error("Transfer cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    Status(reqwest::StatusCode),

    #[error("{0}")]
    Other(String),
}

/// Failure to send or edit an external status message
#[derive(Debug, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Failure to write the snapshot
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to replace snapshot: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Errors reported to callers of the control operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("No such entry: {0}")]
    NoSuchEntry(String),

    #[error("No running task for: {0}")]
    NoSuchTask(String),

    #[error("Entry {id} is {status} and cannot be retried")]
    NotRetryable { id: String, status: TransferStatus },

    #[error("Entry {0} has no source to download from")]
    NoSource(String),

    #[error("Index {0} is out of range")]
    IndexOutOfRange(usize),

    #[error("Request must name an entry by id or index")]
    MissingTarget,
}

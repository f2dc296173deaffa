//! Durable snapshot of the transfer registry.
//!
//! The snapshot is a JSON array of entries. Loading is best-effort and never
//! fails: a missing or unreadable file is an empty registry, a wrapped
//! `{ "downloads": [...] }` object from older versions is unwrapped, and
//! records that don't parse are skipped.

use serde_json::Value;
use std::{
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::StoreError;
use super::models::TransferEntry;

#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    // Serializes full-registry writes
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the last snapshot, degrading to an empty list on any problem
    pub async fn load(&self) -> Vec<TransferEntry> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = ?self.path, "No snapshot found, starting empty");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read snapshot, starting empty");
                return Vec::new();
            }
        };

        let entries = parse_snapshot(&bytes);
        info!(path = ?self.path, count = entries.len(), "Loaded snapshot");
        entries
    }

    /// Takes the snapshot while holding the write lock, so a snapshot taken
    /// earlier can never land on disk after a later one.
    pub async fn save_with<F>(&self, snapshot: F) -> Result<(), StoreError>
    where
        F: FnOnce() -> Vec<TransferEntry>,
    {
        let _guard = self.write_lock.lock().await;
        let entries = snapshot();
        self.write(&entries).await
    }

    async fn write(&self, entries: &[TransferEntry]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let path = self.path.clone();
        trace!(path = ?path, bytes = bytes.len(), "Writing snapshot");

        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;

        Ok(())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path)?;
    Ok(())
}

/// Parses either a bare array or the legacy wrapped object
pub fn parse_snapshot(bytes: &[u8]) -> Vec<TransferEntry> {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Snapshot is not valid JSON, ignoring it");
            return Vec::new();
        }
    };

    let records = match value {
        Value::Array(records) => records,
        Value::Object(mut wrapper) => match wrapper.remove("downloads") {
            Some(Value::Array(records)) => {
                debug!("Unwrapping legacy snapshot object");
                records
            }
            _ => {
                warn!("Snapshot object has no downloads array, ignoring it");
                return Vec::new();
            }
        },
        _ => {
            warn!("Unexpected snapshot shape, ignoring it");
            return Vec::new();
        }
    };

    records
        .into_iter()
        .enumerate()
        .filter_map(
            |(index, record)| match serde_json::from_value::<TransferEntry>(record) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(index, error = %e, "Skipping malformed snapshot record");
                    None
                }
            },
        )
        .collect()
}

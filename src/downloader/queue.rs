//! Transfer supervision
//!
//! [`DownloadQueue`] owns the registry and the map of unit handles. Both
//! live behind one mutex so an entry and its unit handle always change
//! together. Control operations only signal or schedule work; they never
//! wait for a unit to finish.

use chrono::Utc;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ControlError;
use super::models::{MediaKind, TransferEntry, TransferStatus};
use super::notify::Notifier;
use super::progress::DEFAULT_NOTIFY_INTERVAL;
use super::registry::TransferRegistry;
use super::source::{Fetcher, InboundFile, InboundSource, RetrySource, TransferSource};
use super::store::SnapshotStore;
use super::worker::{RetryPolicy, TransferUnit};

/// Error text for entries that were mid-transfer when the process went down
const INTERRUPTED_TEXT: &str = "Interrupted by restart";

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Root directory, files land in a per-kind subdirectory below it
    pub download_dir: PathBuf,
    pub retry: RetryPolicy,
    pub notify_interval: Duration,
    /// Restart interrupted transfers when restoring a snapshot
    pub resume_on_startup: bool,
}

impl QueueSettings {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            retry: RetryPolicy::default(),
            notify_interval: DEFAULT_NOTIFY_INTERVAL,
            resume_on_startup: true,
        }
    }
}

struct UnitHandle {
    generation: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct QueueState {
    registry: TransferRegistry,
    tasks: HashMap<String, UnitHandle>,
    /// Units of deleted entries that may still be winding down
    deleted: HashMap<String, UnitHandle>,
}

pub(super) struct QueueInner {
    state: Mutex<QueueState>,
    store: SnapshotStore,
    fetcher: Arc<dyn Fetcher>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) settings: QueueSettings,
    next_generation: AtomicU64,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panicked holder can't leave an entry half-written, every mutation
        // is a plain field assignment
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn entry(&self, id: &str) -> Option<TransferEntry> {
        self.lock().registry.find(id).cloned()
    }

    /// Applies `f` to the entry if the unit of `generation` still owns it
    pub(super) fn update_entry<R>(
        &self,
        id: &str,
        generation: u64,
        f: impl FnOnce(&mut TransferEntry) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        let owns = state
            .tasks
            .get(id)
            .is_some_and(|handle| handle.generation == generation);
        if !owns {
            return None;
        }
        state.registry.find_mut(id).map(f)
    }

    /// Drops the handle a deleted entry's unit left behind once that unit exits
    pub(super) fn release_deleted(&self, id: &str, generation: u64) {
        let mut state = self.lock();
        if state
            .deleted
            .get(id)
            .is_some_and(|handle| handle.generation == generation)
        {
            state.deleted.remove(id);
        }
    }

    /// Writes the current registry; failures are logged and the in-memory
    /// state stays authoritative
    pub(super) async fn persist(&self) {
        if let Err(e) = self.store.save_with(|| self.lock().registry.all()).await {
            warn!(path = ?self.store.path(), error = %e, "Failed to persist snapshot");
        }
    }
}

#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<QueueInner>,
}

impl DownloadQueue {
    pub fn new(
        store: SnapshotStore,
        fetcher: Arc<dyn Fetcher>,
        notifier: Arc<dyn Notifier>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                store,
                fetcher,
                notifier,
                settings,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Loads the snapshot and reconciles entries that were mid-transfer
    pub async fn restore(&self) {
        let entries = self.inner.store.load().await;
        let resume = self.inner.settings.resume_on_startup;

        {
            let mut state = self.inner.lock();
            state.registry = TransferRegistry::from_entries(entries);

            let interrupted: Vec<TransferEntry> = state
                .registry
                .iter()
                .filter(|entry| entry.status == TransferStatus::Downloading)
                .cloned()
                .collect();

            for entry in interrupted {
                let source = resume
                    .then(|| RetrySource::from_entry(&entry, self.inner.fetcher.clone()))
                    .flatten();

                match source {
                    Some(source) => {
                        info!(id = %entry.id, "Resuming interrupted transfer");
                        let destination = self.destination_for(&entry, &source);
                        if let Some(entry) = state.registry.find_mut(&entry.id) {
                            entry.path = Some(destination.clone());
                        }
                        self.spawn_unit(
                            &mut state,
                            &entry.id,
                            destination,
                            Box::new(source),
                            None,
                            true,
                        );
                    }
                    None => {
                        info!(id = %entry.id, "Marking interrupted transfer as stopped");
                        if let Some(entry) = state.registry.find_mut(&entry.id) {
                            entry.status = TransferStatus::Stopped;
                            entry.speed_kbps = 0.0;
                            entry.pending_seconds = None;
                            entry.last_error = Some(INTERRUPTED_TEXT.to_string());
                        }
                    }
                }
            }

            if state.registry.is_empty() {
                debug!("No previous transfers to restore");
            } else {
                info!(count = state.registry.len(), "Registry restored");
            }
        }

        self.inner.persist().await;
    }

    /// Accepts a "new file available" event, downloading it with the
    /// queue's own fetcher
    pub async fn accept(&self, event: InboundFile) -> String {
        let source = InboundSource::new(event, self.inner.fetcher.clone());
        self.on_inbound_file(source).await
    }

    /// Registers a new transfer and starts a unit for it
    pub async fn on_inbound_file(&self, source: impl TransferSource) -> String {
        let kind = MediaKind::from_mime(source.mime_type());
        let folder = self.inner.settings.download_dir.join(kind.dir_name());

        let id = {
            let mut state = self.inner.lock();
            let id = unique_id(&state.registry, source.file_name());
            let destination = folder.join(&id);

            let mut entry = TransferEntry::new(id.clone());
            entry.source_url = Some(source.locator().to_string());
            entry.mime_type = source.mime_type().map(str::to_string);
            entry.path = Some(destination.clone());

            info!(id = %id, kind = ?kind, path = ?destination, "Adding transfer");
            state.registry.insert_front(entry);

            // A unit of a deleted entry with the same name may still be
            // writing to this destination
            let previous = state.deleted.remove(&id);
            self.spawn_unit(&mut state, &id, destination, Box::new(source), previous, false);
            id
        };

        self.inner.persist().await;
        id
    }

    /// Restarts a failed or stopped transfer
    pub async fn retry(&self, id: &str) -> Result<(), ControlError> {
        {
            let mut state = self.inner.lock();
            let entry = state
                .registry
                .find(id)
                .ok_or_else(|| ControlError::NoSuchEntry(id.to_string()))?;

            if !entry.status.is_retryable() {
                return Err(ControlError::NotRetryable {
                    id: id.to_string(),
                    status: entry.status,
                });
            }

            let source = RetrySource::from_entry(entry, self.inner.fetcher.clone())
                .ok_or_else(|| ControlError::NoSource(id.to_string()))?;
            let destination = self.destination_for(entry, &source);

            if let Some(entry) = state.registry.find_mut(id) {
                entry.reset_for_retry(Utc::now());
                entry.path = Some(destination.clone());
            }

            info!(id = %id, "Retrying transfer");
            let previous = state.tasks.remove(id);
            if let Some(previous) = &previous {
                previous.cancel.cancel();
            }
            self.spawn_unit(&mut state, id, destination, Box::new(source), previous, true);
        }

        self.inner.persist().await;
        Ok(())
    }

    /// Signals cancellation to the running unit for `id`.
    ///
    /// Returns `false` when the unit had already finished.
    pub fn stop(&self, id: &str) -> Result<bool, ControlError> {
        let state = self.inner.lock();
        let handle = state
            .tasks
            .get(id)
            .ok_or_else(|| ControlError::NoSuchTask(id.to_string()))?;

        if handle.join.is_finished() {
            debug!(id = %id, "Stop requested for a finished unit");
            return Ok(false);
        }

        info!(id = %id, "Stopping transfer");
        handle.cancel.cancel();
        Ok(true)
    }

    /// Cancels any running unit and forgets the entry together with its
    /// handle.
    ///
    /// A unit still winding down is parked until it exits, so a later
    /// transfer reusing the id can wait for it first.
    pub async fn delete(&self, id: &str) -> Result<(), ControlError> {
        {
            let mut state = self.inner.lock();
            if state.registry.remove(id).is_none() {
                return Err(ControlError::NoSuchEntry(id.to_string()));
            }
            state.deleted.retain(|_, handle| !handle.join.is_finished());
            if let Some(handle) = state.tasks.remove(id) {
                handle.cancel.cancel();
                if !handle.join.is_finished() {
                    state.deleted.insert(id.to_string(), handle);
                }
            }
            info!(id = %id, "Deleted transfer");
        }

        self.inner.persist().await;
        Ok(())
    }

    /// Id of the entry at `index` in registry order
    pub fn id_at(&self, index: usize) -> Result<String, ControlError> {
        self.inner
            .lock()
            .registry
            .get(index)
            .map(|entry| entry.id.clone())
            .ok_or(ControlError::IndexOutOfRange(index))
    }

    pub fn get(&self, id: &str) -> Option<TransferEntry> {
        self.inner.entry(id)
    }

    /// Consistent copy of every entry, newest first
    pub fn snapshot(&self) -> Vec<TransferEntry> {
        self.inner.lock().registry.all()
    }

    /// Whether a unit for `id` exists and hasn't finished
    pub fn is_running(&self, id: &str) -> bool {
        self.inner
            .lock()
            .tasks
            .get(id)
            .is_some_and(|handle| !handle.join.is_finished())
    }

    /// Flushes a final snapshot. Running entries stay `downloading` on disk
    /// and are picked up again by [`DownloadQueue::restore`].
    pub async fn shutdown(&self) {
        info!("Flushing registry before shutdown");
        self.inner.persist().await;
    }

    fn destination_for(&self, entry: &TransferEntry, source: &dyn TransferSource) -> PathBuf {
        entry.path.clone().unwrap_or_else(|| {
            let kind = MediaKind::from_mime(source.mime_type());
            self.inner
                .settings
                .download_dir
                .join(kind.dir_name())
                .join(&entry.id)
        })
    }

    /// Spawns a unit for `id` and records its handle, all under the caller's lock
    fn spawn_unit(
        &self,
        state: &mut QueueState,
        id: &str,
        destination: PathBuf,
        source: Box<dyn TransferSource>,
        previous: Option<UnitHandle>,
        resume: bool,
    ) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let unit = TransferUnit {
            inner: self.inner.clone(),
            id: id.to_string(),
            generation,
            destination,
            source,
            cancel: cancel.clone(),
            resume,
        };

        let join = tokio::spawn(unit.run(previous.map(|handle| handle.join)));
        state.tasks.insert(
            id.to_string(),
            UnitHandle {
                generation,
                cancel,
                join,
            },
        );
    }
}

/// `name` itself, or `stem (n).ext` with the first free `n`
fn unique_id(registry: &TransferRegistry, name: &str) -> String {
    if !registry.contains(name) {
        return name.to_string();
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| format!("{stem} ({n}){extension}"))
        .find(|candidate| !registry.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

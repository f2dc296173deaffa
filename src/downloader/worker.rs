//! One transfer unit: drives a single entry through its attempts until it
//! ends up done, failed or stopped.

use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use super::TransferError;
use super::models::{MessageRef, ProgressSample, TransferEntry, TransferStatus};
use super::notify::{self, DOWNLOADED_TEXT, DOWNLOADING_TEXT, FAILED_TEXT, STOPPED_TEXT};
use super::progress::ProgressTracker;
use super::queue::QueueInner;
use super::source::TransferSource;

const PROGRESS_CHANNEL_CAPACITY: usize = 16;

/// How the delay between two attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: Backoff,
    /// Upper bound for exponential delays
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            delay: Duration::from_secs(5),
            backoff: Backoff::Fixed,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Done { bytes: u64 },
    Stopped,
    Failed,
}

impl Outcome {
    fn status(self) -> TransferStatus {
        match self {
            Self::Done { .. } => TransferStatus::Done,
            Self::Stopped => TransferStatus::Stopped,
            Self::Failed => TransferStatus::Failed,
        }
    }

    fn text(self) -> &'static str {
        match self {
            Self::Done { .. } => DOWNLOADED_TEXT,
            Self::Stopped => STOPPED_TEXT,
            Self::Failed => FAILED_TEXT,
        }
    }
}

pub(super) struct TransferUnit {
    pub(super) inner: Arc<QueueInner>,
    pub(super) id: String,
    pub(super) generation: u64,
    pub(super) destination: PathBuf,
    pub(super) source: Box<dyn TransferSource>,
    pub(super) cancel: CancellationToken,
    /// Whether the first attempt may continue a partial file left by an
    /// earlier run of this entry
    pub(super) resume: bool,
}

impl TransferUnit {
    /// Runs the unit to a terminal state.
    ///
    /// `previous` is the unit this one replaces; it is awaited first so two
    /// units never write the same entry or file.
    pub(super) async fn run(self, previous: Option<JoinHandle<()>>) {
        let span = info_span!("transfer", id = %self.id, generation = self.generation);
        async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    debug!(error = %e, "Previous unit ended abnormally");
                }
            }
            self.drive().await;
            self.inner.release_deleted(&self.id, self.generation);
        }
        .instrument(span)
        .await
    }

    async fn drive(&self) {
        let policy = self.inner.settings.retry.clone();
        let max = policy.max_retries.max(1);
        let message = self.announce().await;
        let mut tracker = ProgressTracker::new(self.inner.settings.notify_interval, Instant::now());

        for attempt in 1..=max {
            if self.cancel.is_cancelled() {
                return self.finish(Outcome::Stopped, message).await;
            }

            info!(attempt, max, "Starting attempt");
            tracker.begin_attempt(Instant::now());

            let resume = self.resume || attempt > 1;
            match self.attempt(&mut tracker, message.as_ref(), resume).await {
                Ok(bytes) => return self.finish(Outcome::Done { bytes }, message).await,
                Err(TransferError::Cancelled) => {
                    return self.finish(Outcome::Stopped, message).await;
                }
                Err(e) => {
                    let text = format!("Attempt {attempt}/{max} failed: {e}");
                    error!(attempt, max, error = %e, "{text}");
                    self.update(|entry| entry.last_error = Some(text));
                    self.inner.persist().await;

                    if attempt < max {
                        let delay = policy.delay_for(attempt);
                        debug!(delay_secs = delay.as_secs_f64(), "Waiting before retry");
                        tokio::select! {
                            _ = self.cancel.cancelled() => {
                                info!("Cancelled while waiting to retry");
                                return self.finish(Outcome::Stopped, message).await;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        self.finish(Outcome::Failed, message).await
    }

    /// Sends the initial status message, or revives the one a previous run left
    async fn announce(&self) -> Option<MessageRef> {
        let existing = self
            .inner
            .entry(&self.id)
            .and_then(|entry| entry.status_message_ref);

        if let Some(message) = existing {
            self.edit_status(&message, DOWNLOADING_TEXT).await;
            return Some(message);
        }

        match self.inner.notifier.reply(DOWNLOADING_TEXT).await {
            Ok(message) => {
                let stored = message.clone();
                self.update(move |entry| entry.status_message_ref = Some(stored));
                self.inner.persist().await;
                Some(message)
            }
            Err(e) => {
                warn!(error = %e, "Failed to send initial status message");
                None
            }
        }
    }

    async fn attempt(
        &self,
        tracker: &mut ProgressTracker,
        message: Option<&MessageRef>,
        resume: bool,
    ) -> Result<u64, TransferError> {
        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let transfer =
            self.source
                .download(&self.destination, resume, progress_tx, self.cancel.clone());
        tokio::pin!(transfer);

        // Samples are handled here, on the unit's own task, in order
        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Err(TransferError::Cancelled),
                Some(sample) = progress_rx.recv() => self.on_sample(tracker, sample, message).await,
                result = &mut transfer => break result,
            }
        };

        while let Ok(sample) = progress_rx.try_recv() {
            self.on_sample(tracker, sample, message).await;
        }

        result
    }

    async fn on_sample(
        &self,
        tracker: &mut ProgressTracker,
        sample: ProgressSample,
        message: Option<&MessageRef>,
    ) {
        let now = Instant::now();
        let Some((outcome, entry)) = self.update(|entry| {
            let outcome = tracker.on_sample(entry, sample.current, sample.total, now);
            (outcome, entry.clone())
        }) else {
            return;
        };

        trace!(
            bytes = entry.downloaded_bytes,
            total = entry.total_bytes,
            percent = entry.progress_percent,
            speed_kbps = entry.speed_kbps,
            "Download progress"
        );
        if let Some(milestone) = outcome.milestone {
            info!(
                percentage = milestone,
                bytes = entry.downloaded_bytes,
                total = entry.total_bytes,
                "Download milestone"
            );
        }

        self.inner.persist().await;

        if let (true, Some(message)) = (outcome.notify, message) {
            // Edits never hold up the transfer
            let notifier = self.inner.notifier.clone();
            let message = message.clone();
            let text = notify::progress_text(&entry);
            tokio::spawn(
                async move {
                    if let Err(e) = notifier.edit(&message, &text).await {
                        warn!(error = %e, "Failed to edit status message");
                    }
                }
                .in_current_span(),
            );
        }
    }

    async fn finish(&self, outcome: Outcome, message: Option<MessageRef>) {
        let applied = self.update(|entry| {
            entry.status = outcome.status();
            entry.speed_kbps = 0.0;
            match outcome {
                Outcome::Done { bytes } => {
                    entry.progress_percent = 100.0;
                    entry.pending_seconds = Some(0.0);
                    entry.downloaded_bytes = entry.downloaded_bytes.max(bytes);
                    entry.total_bytes = entry.total_bytes.max(entry.downloaded_bytes);
                }
                Outcome::Stopped | Outcome::Failed => {
                    entry.pending_seconds = None;
                }
            }
        });

        if applied.is_some() {
            self.inner.persist().await;
        } else {
            debug!("Entry is no longer owned by this unit");
        }

        match outcome {
            Outcome::Done { bytes } => info!(bytes, path = ?self.destination, "Transfer done"),
            Outcome::Stopped => info!(path = ?self.destination, "Transfer stopped, partial file kept"),
            Outcome::Failed => error!(path = ?self.destination, "Transfer failed, attempts exhausted"),
        }

        if let Some(message) = message {
            self.edit_status(&message, outcome.text()).await;
        }
    }

    async fn edit_status(&self, message: &MessageRef, text: &str) {
        if let Err(e) = self.inner.notifier.edit(message, text).await {
            warn!(error = %e, "Failed to edit status message");
        }
    }

    /// Mutates this unit's entry while the unit still owns it
    fn update<R>(&self, f: impl FnOnce(&mut TransferEntry) -> R) -> Option<R> {
        self.inner.update_entry(&self.id, self.generation, f)
    }
}

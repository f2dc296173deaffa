//! External status notifications (the chat message that follows a transfer)

use bytesize::ByteSize;
use chrono::Utc;
use futures::{FutureExt, future::BoxFuture};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use super::NotifyError;
use super::models::{MessageRef, TransferEntry};

pub const DOWNLOADING_TEXT: &str = "⬇️ Status: Downloading";
pub const DOWNLOADED_TEXT: &str = "✅ Status: Downloaded";
pub const FAILED_TEXT: &str = "❌ Status: Failed";
pub const STOPPED_TEXT: &str = "🛑 Status: Stopped";

/// Sends a status message and edits it later on
pub trait Notifier: Send + Sync + 'static {
    fn reply<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<MessageRef, NotifyError>>;

    fn edit<'a>(
        &'a self,
        message: &'a MessageRef,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Writes status messages to the log.
///
/// Handles are `<process start>-<n>`, so messages sent after a restart never
/// collide with handles stored on restored entries.
#[derive(Debug)]
pub struct LogNotifier {
    session: String,
    next_id: AtomicU64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self {
            session: Utc::now().format("%Y%m%d%H%M%S%3f").to_string(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for LogNotifier {
    fn reply<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<MessageRef, NotifyError>> {
        async move {
            let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let message = MessageRef::Key(format!("{}-{n}", self.session));
            info!(message_id = %message, "{text}");
            Ok(message)
        }
        .boxed()
    }

    fn edit<'a>(
        &'a self,
        message: &'a MessageRef,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        async move {
            info!(message_id = %message, "{text}");
            Ok(())
        }
        .boxed()
    }
}

/// Text of a throttled progress edit
pub fn progress_text(entry: &TransferEntry) -> String {
    format!(
        "{DOWNLOADING_TEXT} {:.1}% ({}/{})",
        entry.progress_percent,
        ByteSize::b(entry.downloaded_bytes),
        ByteSize::b(entry.total_bytes)
    )
}

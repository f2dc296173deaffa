//! Where the bytes of a transfer come from.
//!
//! A [`Fetcher`] is the media-transfer capability of the messaging client. A
//! [`TransferSource`] binds one file to a fetcher: [`InboundSource`] is built
//! from a fresh "new file" event, [`RetrySource`] from a persisted entry when
//! the original event is long gone.

use futures::future::BoxFuture;
use serde::Deserialize;
use std::{path::Path, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::TransferError;
use super::models::{ProgressSample, TransferEntry};

pub type ProgressSender = mpsc::Sender<ProgressSample>;

/// Performs the actual byte transfer for a locator.
///
/// Implementations report progress on `progress` and should stop at the next
/// chunk boundary once `cancel` fires, returning [`TransferError::Cancelled`].
/// Bytes left behind by an earlier attempt may only be continued when
/// `resume` is set; otherwise the transfer starts from zero. On success the
/// number of bytes on disk is returned.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch<'a>(
        &'a self,
        locator: &'a str,
        destination: &'a Path,
        resume: bool,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<u64, TransferError>>;
}

/// One downloadable file
pub trait TransferSource: Send + Sync + 'static {
    fn file_name(&self) -> &str;
    fn mime_type(&self) -> Option<&str>;
    fn locator(&self) -> &str;

    fn download<'a>(
        &'a self,
        destination: &'a Path,
        resume: bool,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<u64, TransferError>>;
}

/// A "new file available" event as delivered by the messaging channel
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFile {
    pub url: String,
    #[serde(default, alias = "name")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

pub struct InboundSource {
    file_name: String,
    mime_type: Option<String>,
    url: String,
    fetcher: Arc<dyn Fetcher>,
}

impl InboundSource {
    /// Resolves the file name and content type the event didn't carry
    pub fn new(event: InboundFile, fetcher: Arc<dyn Fetcher>) -> Self {
        let file_name = event
            .file_name
            .as_deref()
            .and_then(sanitize_file_name)
            .or_else(|| file_name_from_url(&event.url))
            .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d_%H%M%S").to_string());

        let mime_type = event.mime_type.filter(|m| !m.is_empty()).or_else(|| {
            mime_guess::from_path(&file_name)
                .first()
                .map(|mime| mime.essence_str().to_string())
        });

        Self {
            file_name,
            mime_type,
            url: event.url,
            fetcher,
        }
    }
}

impl TransferSource for InboundSource {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    fn locator(&self) -> &str {
        &self.url
    }

    fn download<'a>(
        &'a self,
        destination: &'a Path,
        resume: bool,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<u64, TransferError>> {
        self.fetcher
            .fetch(&self.url, destination, resume, progress, cancel)
    }
}

/// Replays a transfer from what the registry remembers about it
pub struct RetrySource {
    file_name: String,
    mime_type: Option<String>,
    url: String,
    fetcher: Arc<dyn Fetcher>,
}

impl RetrySource {
    /// Returns `None` when the entry never recorded a locator
    pub fn from_entry(entry: &TransferEntry, fetcher: Arc<dyn Fetcher>) -> Option<Self> {
        let url = entry.source_url.clone()?;
        Some(Self {
            file_name: entry.id.clone(),
            mime_type: entry.mime_type.clone(),
            url,
            fetcher,
        })
    }
}

impl TransferSource for RetrySource {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    fn locator(&self) -> &str {
        &self.url
    }

    fn download<'a>(
        &'a self,
        destination: &'a Path,
        resume: bool,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<u64, TransferError>> {
        self.fetcher
            .fetch(&self.url, destination, resume, progress, cancel)
    }
}

/// Keeps only the final path component so a name can't escape its directory
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let name = name.trim().rsplit(['/', '\\']).next()?.trim();
    match name {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(last).ok()?;
    sanitize_file_name(&decoded)
}

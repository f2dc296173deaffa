//! HTTP implementation of [`Fetcher`]
//!
//! Streams a URL into `<destination>.part` and renames it into place once the
//! body is complete. A resumed transfer continues that partial file with a
//! `Range` request guarded by `If-Range`, and progress samples are reported
//! along the way.

use futures::{FutureExt, future::BoxFuture};
use futures_util::StreamExt;
use reqwest::{
    Client, Response, StatusCode, Url,
    header::{self, HeaderMap, HeaderValue},
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use super::TransferError;
use super::models::ProgressSample;
use super::source::{Fetcher, ProgressSender};

/// Minimum spacing between two progress samples of one transfer
const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_redirects: usize,
    /// `ETag` or `Last-Modified` of the response each partial file came from
    validators: Arc<Mutex<HashMap<PathBuf, String>>>,
}

/// Sibling file a transfer writes into until it completes
fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    destination.with_file_name(name)
}

fn validator_of(response: &Response) -> Option<String> {
    let headers = response.headers();
    headers
        .get(header::ETAG)
        .or_else(|| headers.get(header::LAST_MODIFIED))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl HttpFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        // Redirects are followed by hand so the Range header survives them
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            max_redirects: 10,
            validators: Arc::default(),
        })
    }

    fn validators(&self) -> MutexGuard<'_, HashMap<PathBuf, String>> {
        self.validators.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn get_with_redirects(
        &self,
        url: &str,
        resume_from: u64,
        validator: Option<&str>,
    ) -> Result<Response, TransferError> {
        let mut current_url = Url::parse(url).map_err(|e| TransferError::Other(e.to_string()))?;
        let mut redirect_count = 0;

        loop {
            let mut request = self.client.get(current_url.clone());
            if resume_from > 0 {
                request = request.header(header::RANGE, format!("bytes={resume_from}-"));
                if let Some(validator) = validator {
                    request = request.header(header::IF_RANGE, validator);
                }
            }
            let response = request.send().await?;

            if !response.status().is_redirection() || redirect_count >= self.max_redirects {
                return Ok(response);
            }

            let location = response
                .headers()
                .get(header::LOCATION)
                .ok_or_else(|| TransferError::Other("Redirect without Location header".into()))?
                .to_str()
                .map_err(|e| TransferError::Other(e.to_string()))?;

            // Handles relative locations too
            current_url = current_url
                .join(location)
                .map_err(|e| TransferError::Other(e.to_string()))?;
            trace!(url = %current_url, "Following redirect");
            redirect_count += 1;
        }
    }

    /// Without `resume` any leftover partial file is discarded. A validator
    /// is only known for partial files written by this process, so a resume
    /// after a restart is sent without `If-Range`.
    #[instrument(name = "fetch", level = "debug", skip_all, fields(url = %url, resume = resume))]
    async fn fetch_file(
        &self,
        url: &str,
        destination: &Path,
        resume: bool,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<u64, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part = part_path(destination);
        let existing = match tokio::fs::metadata(&part).await {
            Ok(metadata) if resume && metadata.is_file() => metadata.len(),
            _ => 0,
        };
        let validator = if existing > 0 {
            self.validators().get(&part).cloned()
        } else {
            None
        };

        let mut response = self
            .get_with_redirects(url, existing, validator.as_deref())
            .await?;
        if existing > 0 && response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            debug!(existing, "Server refused the range, starting over");
            response = self.get_with_redirects(url, 0, None).await?;
        }

        if !response.status().is_success() {
            return Err(TransferError::Status(response.status()));
        }

        let resumed = existing > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
        let offset = if resumed { existing } else { 0 };
        let total = response.content_length().map_or(0, |len| len + offset);

        match validator_of(&response) {
            Some(validator) => self.validators().insert(part.clone(), validator),
            None => self.validators().remove(&part),
        };

        let mut file = if resumed {
            info!(resume_from = offset, "Resuming partial file");
            OpenOptions::new().append(true).open(&part).await?
        } else {
            File::create(&part).await?
        };

        if total > 0 {
            info!(bytes = total, path = ?destination, "Starting download");
        } else {
            info!(path = ?destination, "Starting download of unknown size");
        }

        let mut downloaded = offset;
        let _ = progress
            .send(ProgressSample {
                current: downloaded,
                total,
            })
            .await;
        let mut last_sample = Instant::now();

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // The partial file stays on disk
                    file.flush().await?;
                    info!(downloaded, "Download cancelled");
                    return Err(TransferError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            trace!(bytes = downloaded, chunk_size = chunk.len(), "Received chunk");

            if last_sample.elapsed() >= SAMPLE_INTERVAL {
                last_sample = Instant::now();
                let _ = progress
                    .send(ProgressSample {
                        current: downloaded,
                        total,
                    })
                    .await;
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&part, destination).await?;
        self.validators().remove(&part);

        let total = if total == 0 { downloaded } else { total };
        let _ = progress
            .send(ProgressSample {
                current: downloaded,
                total,
            })
            .await;

        info!(bytes = downloaded, "Download completed");
        Ok(downloaded)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        locator: &'a str,
        destination: &'a Path,
        resume: bool,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<u64, TransferError>> {
        self.fetch_file(locator, destination, resume, progress, cancel)
            .boxed()
    }
}

//! Config module for telefetch

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};

use crate::downloader::{Backoff, QueueSettings, RetryPolicy};

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum RetryBackoff {
    #[default]
    Fixed,
    Exponential,
}

impl From<RetryBackoff> for Backoff {
    fn from(value: RetryBackoff) -> Self {
        match value {
            RetryBackoff::Fixed => Backoff::Fixed,
            RetryBackoff::Exponential => Backoff::Exponential,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Parser, Debug, Clone)]
pub struct DownloaderConfig {
    /// Root directory for downloaded files, split into Images/Videos/Documents
    #[clap(long, env = "TF_DOWNLOAD_DIR", default_value_os_t = default_data_path("downloads"))]
    pub download_dir: PathBuf,

    /// Snapshot of the download registry
    #[clap(long, env = "TF_STATE_FILE", default_value_os_t = default_data_path("downloads.json"))]
    pub state_file: PathBuf,

    /// Attempts per transfer before it is marked failed
    #[clap(long, env = "TF_MAX_RETRIES", default_value_t = 6, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_retries: u32,

    /// Delay between two attempts, in seconds
    #[clap(long, env = "TF_RETRY_DELAY_SECS", default_value_t = 5)]
    pub retry_delay_secs: u64,

    #[clap(long, env = "TF_RETRY_BACKOFF", value_enum, default_value = "fixed")]
    pub retry_backoff: RetryBackoff,

    /// Upper bound for exponential backoff, in seconds
    #[clap(long, env = "TF_MAX_RETRY_DELAY_SECS", default_value_t = 60)]
    pub max_retry_delay_secs: u64,

    /// Minimum interval between two progress edits of a status message
    #[clap(long, env = "TF_NOTIFY_INTERVAL_SECS", default_value_t = 20)]
    pub notify_interval_secs: u64,

    /// Resume transfers that were running when the process stopped
    #[clap(long, env = "TF_RESUME_ON_STARTUP", default_value_t = true, action = clap::ArgAction::Set)]
    pub resume_on_startup: bool,
}

/// `<data dir>/telefetch/<name>`, relative to the working directory when
/// the platform has no data dir
fn default_data_path(name: &str) -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("telefetch"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(name)
}

impl DownloaderConfig {
    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            download_dir: self.download_dir.clone(),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                delay: Duration::from_secs(self.retry_delay_secs),
                backoff: self.retry_backoff.into(),
                max_delay: Duration::from_secs(self.max_retry_delay_secs),
            },
            notify_interval: Duration::from_secs(self.notify_interval_secs),
            resume_on_startup: self.resume_on_startup,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(name = "telefetch", version, about = "Download manager for files shared over a chat channel")]
pub struct Config {
    #[clap(long, env = "TF_HOST", default_value = "0.0.0.0:4444")]
    pub host: SocketAddr,

    #[clap(long, env = "TF_LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    #[clap(flatten)]
    pub downloader: DownloaderConfig,
}

pub fn config() -> Config {
    Config::parse()
}

mod backend;
mod config;
mod downloader;
mod router;
mod util;

use color_eyre::eyre::WrapErr;
use config::LogFormat;
use downloader::{DownloadQueue, HttpFetcher, LogNotifier, SnapshotStore};
use router::{AppState, create_router};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "telefetch=info,tower_http=info";

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    let config = config::config();
    init_tracing(config.log_format);
    color_eyre::install()?;

    let downloader = &config.downloader;
    tokio::fs::create_dir_all(&downloader.download_dir)
        .await
        .wrap_err_with(|| format!("Failed to create {}", downloader.download_dir.display()))?;
    tracing::info!("Download directory: {}", downloader.download_dir.display());

    let fetcher = HttpFetcher::new().wrap_err("Failed to build HTTP client")?;
    let queue = DownloadQueue::new(
        SnapshotStore::new(&downloader.state_file),
        Arc::new(fetcher),
        Arc::new(LogNotifier::new()),
        downloader.queue_settings(),
    );
    queue.restore().await;

    let app = create_router(AppState {
        queue: queue.clone(),
    });
    let listener = tokio::net::TcpListener::bind(config.host)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.host))?;
    tracing::info!("Listening on: {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.shutdown().await;
    Ok(())
}

use std::sync::Arc;

use anyhow::Context;
use s3watch_object_store::S3ObjectStore;
use s3watch_uploader::{MonitorConfig, ResultLog, UploadMonitor};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the real environment always wins.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = MonitorConfig::from_env().context("invalid configuration")?;
    let store = Arc::new(S3ObjectStore::connect(&config.s3).await);

    let shutdown = CancellationToken::new();
    let mut monitor = UploadMonitor::new(config, store)
        .start(shutdown.clone())
        .await
        .context("failed to start upload monitor")?;

    let sink = monitor
        .take_results()
        .map(|results| tokio::spawn(ResultLog::default().drain(results)));

    wait_for_signal().await.context("failed to listen for signals")?;
    info!("Shutdown requested");
    shutdown.cancel();

    monitor.wait().await?;
    if let Some(sink) = sink {
        sink.await.context("result log task failed")?;
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

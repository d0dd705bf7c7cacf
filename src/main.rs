use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use feedsync::catalog::{CatalogStore, MediaStore};
use feedsync::config::SyncConfig;
use feedsync::feed::FeedClient;
use feedsync::media::ImageFetcher;
use feedsync::store::SqliteStore;
use feedsync::sync::{run_scheduler, SyncService};
use feedsync::util::env::env_flag;
use tokio::sync::broadcast;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // --- logging -------------------------------------------------------------
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    // --- configuration & stores ---------------------------------------------
    let config = SyncConfig::from_env();
    info!(
        feed = %config.feed_url,
        interval_secs = config.interval_secs,
        "feedsync starting"
    );

    let store = Arc::new(
        SqliteStore::open(&config)
            .await
            .context("opening catalog store")?,
    );
    let catalog: Arc<dyn CatalogStore> = store.clone();
    let media: Arc<dyn MediaStore> = store.clone();

    let feed = FeedClient::new(&config).context("building feed client")?;
    let images = Arc::new(ImageFetcher::new(&config, media.clone()).context("building image fetcher")?);
    let service = Arc::new(SyncService::new(feed, catalog, media, images));

    // --- one-shot mode -------------------------------------------------------
    // SYNC_RUN_ONCE=1 runs a single pass and exits; a fatal fetch error is
    // process-exit-worthy here.
    if env_flag("SYNC_RUN_ONCE", false) {
        let report = service.run_once().await.context("sync pass failed")?;
        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            failures = report.failures.len(),
            "one-shot sync complete"
        );
        return Ok(());
    }

    // --- scheduler -----------------------------------------------------------
    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let (wake_tx, _) = broadcast::channel::<()>(16);

    let scheduler = tokio::spawn(run_scheduler(
        service,
        config.interval_secs,
        shutdown_tx.clone(),
        wake_tx.clone(),
    ));

    // SIGHUP requests an immediate pass without waiting for the next tick.
    #[cfg(unix)]
    {
        let wake = wake_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut hup = match signal(SignalKind::hangup()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGHUP handler");
                    return;
                }
            };
            while hup.recv().await.is_some() {
                info!("SIGHUP received; requesting sync pass");
                let _ = wake.send(());
            }
        });
    }

    info!("service started — press Ctrl+C to stop, SIGHUP to sync now");
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown: Ctrl+C received");

    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler.await {
        error!(error = %e, "scheduler task join error");
    }

    info!("all tasks stopped — goodbye");
    Ok(())
}

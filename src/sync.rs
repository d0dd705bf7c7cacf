//! Sync orchestrator: composes feed client, reconciler and stores into one
//! pass, plus the recurring scheduler that drives it.
//!
//! Passes are strictly sequential; the scheduler loop runs at most one pass
//! at a time and a tick that fires mid-pass is delayed, not stacked. No state
//! is carried between passes; every run starts from a fresh snapshot.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::catalog::{CatalogStore, MediaStore, StoreError};
use crate::feed::{self, FeedClient, FetchError};
use crate::media::ImageUploader;
use crate::reconcile::{Reconciler, SyncReport};

#[derive(Debug, Error)]
pub enum SyncError {
    /// Terminal fetch failure; the pass was aborted before any mutation.
    #[error("remote feed unavailable: {0}")]
    Fetch(#[from] FetchError),
    #[error("catalog unavailable: {0}")]
    Store(#[from] StoreError),
}

pub struct SyncService {
    feed: FeedClient,
    catalog: Arc<dyn CatalogStore>,
    reconciler: Reconciler,
}

impl SyncService {
    pub fn new(
        feed: FeedClient,
        catalog: Arc<dyn CatalogStore>,
        media: Arc<dyn MediaStore>,
        images: Arc<dyn ImageUploader>,
    ) -> Self {
        let reconciler = Reconciler::new(catalog.clone(), media, images);
        Self {
            feed,
            catalog,
            reconciler,
        }
    }

    /// One full sync pass. The remote snapshot is fetched before anything
    /// else; if the feed is unreachable the local catalog is left untouched.
    pub async fn run_once(&self) -> Result<SyncReport, SyncError> {
        let products = self.feed.fetch().await?;
        let snapshot = feed::snapshot(products);
        let locals = self.catalog.list_all().await?;
        info!(
            remote = snapshot.len(),
            local = locals.len(),
            "starting reconcile pass"
        );
        Ok(self.reconciler.reconcile(snapshot, locals).await)
    }
}

/// Recurring scheduler. Drift-free interval with an immediate first pass;
/// wake signals trigger an on-demand run and are coalesced while a pass is
/// in flight.
pub async fn run_scheduler(
    service: Arc<SyncService>,
    interval_secs: u64,
    shutdown: broadcast::Sender<()>,
    wake: broadcast::Sender<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut wake_rx = wake.subscribe();
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        info!("sync: tick");
        let t0 = Instant::now();
        match service.run_once().await {
            Ok(report) => {
                info!(
                    elapsed_ms = %t0.elapsed().as_millis(),
                    created = report.created,
                    updated = report.updated,
                    deleted = report.deleted,
                    failures = report.failures.len(),
                    "sync: pass complete"
                );
            }
            Err(e) => {
                error!(error = %e, "sync: pass failed; next tick retries from scratch");
            }
        }

        // Coalesce wakes queued while the pass ran: run once more, promptly.
        let mut wakes = 0u32;
        while wake_rx.try_recv().is_ok() {
            wakes = wakes.saturating_add(1);
        }
        if wakes > 0 {
            info!(wakes, "sync: coalesced wake(s) received; running again immediately");
            continue;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = wake_rx.recv() => {
                info!("sync: wake signal received");
            }
            _ = shutdown_rx.recv() => {
                info!("sync: shutdown");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::media::ImageFetcher;
    use crate::store::SqliteStore;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            if start.elapsed() > deadline {
                panic!("condition not met within {deadline:?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn dead_feed_config() -> SyncConfig {
        SyncConfig {
            feed_url: "http://127.0.0.1:9/products".into(),
            http_timeout_secs: 1,
            max_fetch_attempts: 2,
            fetch_backoff_ms: 0,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn fatal_fetch_aborts_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory(dir.path()).await.unwrap());

        // seed one product that an aborted pass must not touch
        let seeded = crate::catalog::LocalProduct {
            id: None,
            sku: "KEEP".into(),
            name: "Keeper".into(),
            description: String::new(),
            price: BigDecimal::from_str("1.00").unwrap(),
            stock_quantity: 1,
            image_id: None,
        };
        store.create(&seeded).await.unwrap();

        let config = dead_feed_config();
        let feed = FeedClient::new(&config).unwrap();
        let images = Arc::new(ImageFetcher::new(&config, store.clone()).unwrap());
        let service = SyncService::new(feed, store.clone(), store.clone(), images);

        match service.run_once().await {
            Err(SyncError::Fetch(FetchError::Exhausted { attempts, .. })) => {
                assert_eq!(attempts, 2)
            }
            other => panic!("expected fatal fetch error, got {other:?}"),
        }

        let locals = store.list_all().await.unwrap();
        assert_eq!(locals.len(), 1);
        assert_eq!(locals[0].sku, "KEEP");
    }

    #[tokio::test]
    async fn wake_signal_triggers_extra_pass() {
        use std::sync::atomic::{AtomicU32, Ordering};

        // counting endpoint: every fetch attempt opens one connection that is
        // dropped immediately, so each pass fails fast but leaves a mark
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let hits_accept = hits.clone();
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                hits_accept.fetch_add(1, Ordering::SeqCst);
                drop(sock);
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory(dir.path()).await.unwrap());
        let config = SyncConfig {
            feed_url: format!("http://{addr}/products"),
            http_timeout_secs: 1,
            max_fetch_attempts: 1,
            fetch_backoff_ms: 0,
            ..SyncConfig::default()
        };
        let feed = FeedClient::new(&config).unwrap();
        let images = Arc::new(ImageFetcher::new(&config, store.clone()).unwrap());
        let service = Arc::new(SyncService::new(feed, store.clone(), store.clone(), images));

        let (shutdown_tx, _) = broadcast::channel::<()>(4);
        let (wake_tx, _) = broadcast::channel::<()>(16);
        // long interval: any pass after the first must come from the wake
        let scheduler = tokio::spawn(run_scheduler(
            service,
            3600,
            shutdown_tx.clone(),
            wake_tx.clone(),
        ));

        let hits_seen = hits.clone();
        wait_until(Duration::from_secs(10), move || {
            hits_seen.load(Ordering::SeqCst) >= 1
        })
        .await;
        let before = hits.load(Ordering::SeqCst);

        wake_tx.send(()).unwrap();
        let hits_seen = hits.clone();
        wait_until(Duration::from_secs(10), move || {
            hits_seen.load(Ordering::SeqCst) > before
        })
        .await;

        let _ = shutdown_tx.send(());
        scheduler.await.unwrap();
    }
}

// Fixed-cadence status poll loop. Each tick fans out one coalesced refresh
// per device onto its own task; a slow device never delays the others.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::{Duration, interval};
use tracing::debug;

use crate::registry::FleetRegistry;
use crate::status_cache::StatusCache;

pub struct PollerDeps {
    pub registry: Arc<FleetRegistry>,
    pub cache: Arc<StatusCache>,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

pub struct PollerConfig {
    pub poll_interval_secs: u64,
    /// How often to log app stats (real seconds).
    pub stats_log_interval_secs: u64,
}

pub fn spawn(deps: PollerDeps, config: PollerConfig) -> tokio::task::JoinHandle<()> {
    let PollerDeps {
        registry,
        cache,
        mut shutdown_rx,
    } = deps;

    let refreshes_total = Arc::new(AtomicU64::new(0));

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(config.poll_interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_log_tick = interval(Duration::from_secs(config.stats_log_interval_secs));
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    // Per-device refreshes are serialized by the cache's
                    // coalescing, so overlapping a slow poll is harmless.
                    for device in registry.list_devices() {
                        let cache = cache.clone();
                        let refreshes_total = refreshes_total.clone();
                        tokio::spawn(async move {
                            let snapshot = cache.refresh(&device).await;
                            refreshes_total.fetch_add(1, Ordering::Relaxed);
                            debug!(
                                device = %device.id,
                                online = snapshot.online,
                                operation = "poll_refresh",
                                "device polled"
                            );
                        });
                    }
                }
                _ = &mut shutdown_rx => {
                    debug!("poller shutting down");
                    break;
                }
                _ = stats_log_tick.tick() => {
                    tracing::info!(
                        devices = registry.list_devices().len(),
                        cached_snapshots = cache.len(),
                        refreshes_total = refreshes_total.load(Ordering::Relaxed),
                        "app stats"
                    );
                }
            }
        }
    })
}

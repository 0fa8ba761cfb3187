// Status cache tests: coalescing, non-blocking reads, offline degradation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use fleetdeck::error::FleetError;
use fleetdeck::models::{ContainerStatus, Device, DeviceMetrics};
use fleetdeck::status_cache::{ProbeReport, StatusCache, StatusProber};

fn test_device(id: &str) -> Device {
    Device {
        id: id.into(),
        name: id.into(),
        address: "192.0.2.10".into(),
        is_local: false,
        ssh: None,
        wol: None,
        containers: Vec::new(),
    }
}

fn test_metrics(cpu: f64) -> DeviceMetrics {
    DeviceMetrics {
        cpu_percent: cpu,
        ram_used: 1024,
        ram_total: 4096,
        temp_celsius: None,
        uptime_secs: 42,
    }
}

/// Prober with a configurable delay and failure switch, counting probes.
struct MockProber {
    probes: AtomicU64,
    delay_ms: u64,
    fail: AtomicBool,
}

impl MockProber {
    fn new(delay_ms: u64) -> Self {
        Self {
            probes: AtomicU64::new(0),
            delay_ms,
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StatusProber for MockProber {
    async fn probe(&self, _device: &Device) -> Result<ProbeReport, FleetError> {
        let n = self.probes.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(FleetError::Unreachable("mock down".into()));
        }
        Ok(ProbeReport {
            online: true,
            metrics: Some(test_metrics(n as f64)),
            containers: vec![ContainerStatus {
                name: "web".into(),
                state: "running".into(),
            }],
        })
    }
}

#[tokio::test]
async fn concurrent_refreshes_coalesce_into_one_probe() {
    let prober = Arc::new(MockProber::new(100));
    let cache = Arc::new(StatusCache::new(prober.clone(), None));
    let device = test_device("nas");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let device = device.clone();
        handles.push(tokio::spawn(async move { cache.refresh(&device).await }));
    }
    let mut snapshots = Vec::new();
    for handle in handles {
        snapshots.push(handle.await.unwrap());
    }

    assert_eq!(
        prober.probes.load(Ordering::SeqCst),
        1,
        "10 concurrent refreshes must issue exactly one probe"
    );
    for snapshot in &snapshots {
        assert_eq!(snapshot, &snapshots[0], "all callers see the same snapshot");
        assert!(snapshot.online);
        assert!(!snapshot.loading);
    }
}

#[tokio::test]
async fn sequential_refreshes_probe_again() {
    let prober = Arc::new(MockProber::new(0));
    let cache = StatusCache::new(prober.clone(), None);
    let device = test_device("nas");

    cache.refresh(&device).await;
    cache.refresh(&device).await;
    assert_eq!(prober.probes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn read_on_never_refreshed_device_returns_offline_default() {
    let prober = Arc::new(MockProber::new(0));
    let cache = StatusCache::new(prober, None);

    let snapshot = cache.read("ghost");
    assert_eq!(snapshot.device_id, "ghost");
    assert!(!snapshot.online);
    assert!(snapshot.metrics.is_none());
    assert!(snapshot.containers.is_empty());
    assert!(!snapshot.loading);
    assert_eq!(snapshot.captured_at, 0);
}

#[tokio::test]
async fn read_reports_loading_while_refresh_in_flight() {
    let prober = Arc::new(MockProber::new(200));
    let cache = Arc::new(StatusCache::new(prober, None));
    let device = test_device("nas");

    let refresh = {
        let cache = cache.clone();
        let device = device.clone();
        tokio::spawn(async move { cache.refresh(&device).await })
    };
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    let during = cache.read("nas");
    assert!(during.loading, "read during in-flight refresh sets loading");
    assert!(!during.online, "committed state is still the offline default");

    refresh.await.unwrap();
    let after = cache.read("nas");
    assert!(!after.loading);
    assert!(after.online);
}

#[tokio::test]
async fn failed_probe_commits_offline_snapshot() {
    let prober = Arc::new(MockProber::new(0));
    prober.fail.store(true, Ordering::SeqCst);
    let cache = StatusCache::new(prober.clone(), None);
    let device = test_device("nas");

    // Three consecutive failing polls: stays offline, loading resets, no
    // error escapes.
    for _ in 0..3 {
        let snapshot = cache.refresh(&device).await;
        assert!(!snapshot.online);
        assert!(snapshot.metrics.is_none());
        assert!(!snapshot.loading);
    }
    assert_eq!(prober.probes.load(Ordering::SeqCst), 3);

    // Recovery commits a fresh online snapshot over the offline one.
    prober.fail.store(false, Ordering::SeqCst);
    let snapshot = cache.refresh(&device).await;
    assert!(snapshot.online);
    assert!(snapshot.metrics.is_some());
}

#[tokio::test]
async fn register_and_remove_manage_snapshot_lifecycle() {
    let prober = Arc::new(MockProber::new(0));
    let cache = StatusCache::new(prober, None);
    let device = test_device("nas");

    cache.register("nas");
    assert_eq!(cache.len(), 1);

    cache.refresh(&device).await;
    assert!(cache.read("nas").online);

    cache.remove("nas");
    assert_eq!(cache.len(), 0);
    // Reads after removal fall back to the default, never an error.
    assert!(!cache.read("nas").online);
}

// Per-device status cache. Readers never block; concurrent refreshes for the
// same device coalesce into one probe, and every caller gets the committed
// snapshot. A failed probe commits an offline snapshot instead of erroring.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use crate::error::FleetError;
use crate::models::{ContainerStatus, Device, DeviceMetrics, StatusSnapshot, now_ms};
use crate::notifier::Notifier;

/// What one probe of a device produced.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub online: bool,
    pub metrics: Option<DeviceMetrics>,
    pub containers: Vec<ContainerStatus>,
}

impl ProbeReport {
    pub fn offline() -> Self {
        ProbeReport {
            online: false,
            metrics: None,
            containers: Vec::new(),
        }
    }
}

/// Collects status for one device. Behind a trait so the cache is testable
/// without a fleet.
#[async_trait]
pub trait StatusProber: Send + Sync {
    async fn probe(&self, device: &Device) -> Result<ProbeReport, FleetError>;
}

struct Slot {
    snapshot: StatusSnapshot,
    /// Present while a refresh is in flight; late callers subscribe instead
    /// of probing again.
    inflight: Option<broadcast::Sender<StatusSnapshot>>,
    /// Last committed online state; None until the first commit so the first
    /// observation never notifies.
    seen_online: Option<bool>,
    prev_container_states: HashMap<String, String>,
}

impl Slot {
    fn new(device_id: &str) -> Self {
        Slot {
            snapshot: StatusSnapshot::offline(device_id),
            inflight: None,
            seen_online: None,
            prev_container_states: HashMap::new(),
        }
    }
}

pub struct StatusCache {
    prober: Arc<dyn StatusProber>,
    notifier: Option<Arc<Notifier>>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl StatusCache {
    pub fn new(prober: Arc<dyn StatusProber>, notifier: Option<Arc<Notifier>>) -> Self {
        Self {
            prober,
            notifier,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Non-blocking read of the last committed snapshot. A device that never
    /// completed a refresh reports the offline default; `loading` reflects an
    /// in-flight refresh.
    pub fn read(&self, device_id: &str) -> StatusSnapshot {
        let slots = self.slots.lock().expect("status cache lock poisoned");
        match slots.get(device_id) {
            Some(slot) => {
                let mut snapshot = slot.snapshot.clone();
                snapshot.loading = slot.inflight.is_some();
                snapshot
            }
            None => StatusSnapshot::offline(device_id),
        }
    }

    /// Refresh `device`, coalescing with any refresh already in flight for
    /// it. All concurrent callers observe the identical committed snapshot.
    /// Probe failures degrade to an offline snapshot; this never errors.
    #[instrument(skip(self, device), fields(device = %device.id))]
    pub async fn refresh(&self, device: &Device) -> StatusSnapshot {
        // Decide under the lock whether to lead the probe or wait for an
        // in-flight one, and release the guard before any await so the
        // returned future stays `Send`.
        enum Lead {
            Wait(broadcast::Receiver<StatusSnapshot>),
            Probe(broadcast::Sender<StatusSnapshot>),
        }
        let lead = {
            let mut slots = self.slots.lock().expect("status cache lock poisoned");
            let slot = slots
                .entry(device.id.clone())
                .or_insert_with(|| Slot::new(&device.id));
            if let Some(tx) = &slot.inflight {
                // Someone is already probing; wait for their commit.
                Lead::Wait(tx.subscribe())
            } else {
                let (tx, _) = broadcast::channel(1);
                slot.inflight = Some(tx.clone());
                Lead::Probe(tx)
            }
        };
        let tx = match lead {
            Lead::Wait(mut rx) => {
                return match rx.recv().await {
                    Ok(snapshot) => snapshot,
                    Err(_) => self.read(&device.id),
                };
            }
            Lead::Probe(tx) => tx,
        };

        // Probe outside the lock; only the commit below re-enters it.
        let report = match self.prober.probe(device).await {
            Ok(report) => report,
            Err(e) => {
                if e.is_recoverable() {
                    debug!(device = %device.id, error = %e, "probe failed; committing offline");
                } else {
                    warn!(device = %device.id, error = %e, "probe failed; committing offline");
                }
                ProbeReport::offline()
            }
        };

        let snapshot = StatusSnapshot {
            device_id: device.id.clone(),
            online: report.online,
            metrics: if report.online { report.metrics } else { None },
            containers: report.containers,
            captured_at: now_ms(),
            loading: false,
        };

        let transitions = {
            let mut slots = self.slots.lock().expect("status cache lock poisoned");
            match slots.get_mut(&device.id) {
                Some(slot) => {
                    let transitions = detect_transitions(slot, device, &snapshot);
                    slot.snapshot = snapshot.clone();
                    slot.seen_online = Some(snapshot.online);
                    slot.prev_container_states = snapshot
                        .containers
                        .iter()
                        .map(|c| (c.name.clone(), c.state.clone()))
                        .collect();
                    slot.inflight = None;
                    transitions
                }
                // Device was removed while the probe ran; drop the commit but
                // still hand waiters the result.
                None => Vec::new(),
            }
        };

        let _ = tx.send(snapshot.clone());

        if let Some(notifier) = &self.notifier {
            for t in transitions {
                notifier.notify_transition(&t).await;
            }
        }

        snapshot
    }

    /// Seed the default offline snapshot the moment a device is registered.
    pub fn register(&self, device_id: &str) {
        let mut slots = self.slots.lock().expect("status cache lock poisoned");
        slots
            .entry(device_id.to_string())
            .or_insert_with(|| Slot::new(device_id));
    }

    /// Discard a removed device's snapshot.
    pub fn remove(&self, device_id: &str) {
        let mut slots = self.slots.lock().expect("status cache lock poisoned");
        slots.remove(device_id);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("status cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State transition worth notifying about, detected at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    DeviceOnline { device: String },
    DeviceOffline { device: String },
    ContainerStopped { device: String, container: String },
}

fn detect_transitions(slot: &Slot, device: &Device, new: &StatusSnapshot) -> Vec<Transition> {
    let mut out = Vec::new();
    // The control host's own reachability is not news.
    if !device.is_local
        && let Some(prev_online) = slot.seen_online
        && prev_online != new.online
    {
        out.push(if new.online {
            Transition::DeviceOnline {
                device: device.name.clone(),
            }
        } else {
            Transition::DeviceOffline {
                device: device.name.clone(),
            }
        });
    }
    for container in &new.containers {
        let was_running = slot
            .prev_container_states
            .get(&container.name)
            .map(|s| s == "running")
            .unwrap_or(false);
        if was_running && !container.is_running() {
            out.push(Transition::ContainerStopped {
                device: device.name.clone(),
                container: container.name.clone(),
            });
        }
    }
    out
}

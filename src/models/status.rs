// Cached device status: reachability, metrics, container state

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch; the snapshot/run-record timestamp unit.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Resource metrics for one device. Remote values come from /proc over ssh,
/// local values from sysinfo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetrics {
    pub cpu_percent: f64,
    pub ram_used: u64,
    pub ram_total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_celsius: Option<f64>,
    pub uptime_secs: u64,
}

/// State of one tracked container, as reported by `docker ps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    /// Lowercase docker state ("running", "exited", ...); "unknown" when the
    /// container was configured but not reported.
    pub state: String,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// The last committed status for a device. Exactly one exists per registered
/// device; it is replaced whole, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub device_id: String,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<DeviceMetrics>,
    #[serde(default)]
    pub containers: Vec<ContainerStatus>,
    pub captured_at: u64,
    /// True while a refresh for this device is in flight.
    pub loading: bool,
}

impl StatusSnapshot {
    /// The initial state for a device that has never completed a refresh.
    pub fn offline(device_id: &str) -> Self {
        StatusSnapshot {
            device_id: device_id.to_string(),
            online: false,
            metrics: None,
            containers: Vec::new(),
            captured_at: 0,
            loading: false,
        }
    }
}

// Local host metrics via sysinfo (+ /sys thermal zone on Linux)

use std::sync::Arc;
use std::time::Instant;

use sysinfo::System;
use tracing::instrument;

use crate::models::DeviceMetrics;

pub struct SysinfoRepo {
    sys: Arc<std::sync::Mutex<System>>,
    last_cpu_refresh: Arc<std::sync::Mutex<Option<(Instant, f64)>>>,
}

impl Default for SysinfoRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoRepo {
    pub fn new() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();
        Self {
            sys: Arc::new(std::sync::Mutex::new(sys)),
            last_cpu_refresh: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Collect the control host's own metrics. CPU usage needs a delta, so
    /// the first call reports 0 and establishes the baseline.
    #[instrument(skip(self), fields(repo = "sysinfo", operation = "get_metrics"))]
    pub async fn get_metrics(&self) -> anyhow::Result<DeviceMetrics> {
        let sys = self.sys.clone();
        let last_cpu_refresh = self.last_cpu_refresh.clone();
        tokio::task::spawn_blocking(move || {
            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;

            let now = Instant::now();
            let usage = if let Ok(mut guard) = last_cpu_refresh.lock() {
                if let Some((prev_ts, prev_usage)) = *guard {
                    if now.duration_since(prev_ts) >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL {
                        sys.refresh_cpu_all();
                        let new_usage = sys.global_cpu_usage() as f64;
                        *guard = Some((now, new_usage));
                        new_usage
                    } else {
                        prev_usage
                    }
                } else {
                    sys.refresh_cpu_all();
                    *guard = Some((now, 0.0));
                    0.0
                }
            } else {
                sys.refresh_cpu_all();
                0.0
            };

            sys.refresh_memory();
            let total = sys.total_memory();
            let available = sys.available_memory();
            let used = total.saturating_sub(available);

            Ok(DeviceMetrics {
                cpu_percent: usage.clamp(0.0, 100.0),
                ram_used: used,
                ram_total: total,
                temp_celsius: read_thermal_zone_linux(),
                uptime_secs: System::uptime(),
            })
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }
}

/// Read CPU temperature from the first thermal zone (Linux, millidegrees).
fn read_thermal_zone_linux() -> Option<f64> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp").ok()?;
        let millis = content.trim().parse::<i64>().ok()?;
        if millis > 0 {
            return Some(millis as f64 / 1000.0);
        }
    }
    None
}

// Production status prober: sysinfo + bollard for the local host, ping + one
// ssh /proc read + one docker ps for remote hosts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::docker_repo::DockerRepo;
use crate::error::FleetError;
use crate::executor::CommandExecutor;
use crate::models::{ContainerStatus, Device, DeviceMetrics};
use crate::status_cache::{ProbeReport, StatusProber};
use crate::sysinfo_repo::SysinfoRepo;

/// One ssh round trip covers everything the metrics need; sections split on
/// the marker line.
const REMOTE_STATS_SCRIPT: &str = "nproc; echo ---; cat /proc/loadavg; echo ---; \
     head -10 /proc/meminfo; echo ---; \
     cat /sys/class/thermal/thermal_zone*/temp 2>/dev/null | head -1; echo ---; \
     cat /proc/uptime";

const PING_TIMEOUT_SECS: u64 = 2;

pub struct FleetProber {
    executor: Arc<CommandExecutor>,
    sysinfo: SysinfoRepo,
    /// None when the local docker daemon is unavailable; container states
    /// then report "unknown".
    docker: Option<DockerRepo>,
    probe_timeout: Duration,
}

impl FleetProber {
    pub fn new(
        executor: Arc<CommandExecutor>,
        docker: Option<DockerRepo>,
        probe_timeout_secs: u64,
    ) -> Self {
        Self {
            executor,
            sysinfo: SysinfoRepo::new(),
            docker,
            probe_timeout: Duration::from_secs(probe_timeout_secs),
        }
    }

    async fn probe_local(&self, device: &Device) -> Result<ProbeReport, FleetError> {
        let metrics = self
            .sysinfo
            .get_metrics()
            .await
            .map_err(|e| FleetError::ActionError(format!("local metrics: {e}")))?;
        let containers = match &self.docker {
            Some(docker) => docker.status_of(&device.containers).await,
            None => unknown_containers(&device.containers),
        };
        Ok(ProbeReport {
            online: true,
            metrics: Some(metrics),
            containers,
        })
    }

    async fn probe_remote(&self, device: &Device) -> Result<ProbeReport, FleetError> {
        if !self.executor.ping(device, PING_TIMEOUT_SECS).await {
            return Ok(ProbeReport::offline());
        }
        if device.ssh.is_none() {
            // Reachable but not inspectable; wol-only devices end up here.
            return Ok(ProbeReport {
                online: true,
                metrics: None,
                containers: unknown_containers(&device.containers),
            });
        }

        let metrics = match self.remote_metrics(device).await {
            Ok(m) => Some(m),
            Err(e) => {
                debug!(device = %device.id, error = %e, "remote metrics unavailable");
                None
            }
        };
        let containers = self.remote_containers(device).await;

        Ok(ProbeReport {
            online: true,
            metrics,
            containers,
        })
    }

    async fn remote_metrics(&self, device: &Device) -> Result<DeviceMetrics, FleetError> {
        // The whole script is one fixed remote command; the device's shell
        // runs the `;`-sequence and we split the sections back out.
        let out = self
            .executor
            .execute(device, REMOTE_STATS_SCRIPT, &[], self.probe_timeout)
            .await?;
        if !out.success() {
            return Err(FleetError::ActionError(format!(
                "remote stats exited {}",
                out.exit_code
            )));
        }
        parse_remote_stats(&out.stdout)
            .ok_or_else(|| FleetError::ActionError("unparseable remote stats".into()))
    }

    async fn remote_containers(&self, device: &Device) -> Vec<ContainerStatus> {
        if device.containers.is_empty() {
            return Vec::new();
        }
        let args: Vec<String> = ["ps", "-a", "--format", "{{.Names}}:{{.State}}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        match self
            .executor
            .execute(device, "docker", &args, self.probe_timeout)
            .await
        {
            Ok(out) if out.success() => map_container_states(&out.stdout, &device.containers),
            Ok(out) => {
                debug!(device = %device.id, exit_code = out.exit_code, "remote docker ps failed");
                unknown_containers(&device.containers)
            }
            Err(e) => {
                debug!(device = %device.id, error = %e, "remote docker ps failed");
                unknown_containers(&device.containers)
            }
        }
    }
}

#[async_trait]
impl StatusProber for FleetProber {
    async fn probe(&self, device: &Device) -> Result<ProbeReport, FleetError> {
        if device.is_local {
            self.probe_local(device).await
        } else {
            self.probe_remote(device).await
        }
    }
}

fn unknown_containers(names: &[String]) -> Vec<ContainerStatus> {
    names
        .iter()
        .map(|name| ContainerStatus {
            name: name.clone(),
            state: "unknown".into(),
        })
        .collect()
}

/// Parse the `---`-separated sections of REMOTE_STATS_SCRIPT output.
/// Exposed for unit tests.
pub fn parse_remote_stats(stdout: &str) -> Option<DeviceMetrics> {
    let parts: Vec<&str> = stdout.split("---").collect();
    if parts.len() < 5 {
        return None;
    }

    let cpu_count = parts[0].trim().parse::<u64>().unwrap_or(4).max(1);
    let load = parts[1].trim().split_whitespace().next()?.parse::<f64>().ok()?;
    let cpu_percent = (load / cpu_count as f64 * 100.0).min(100.0);

    let mut mem_total = 0u64;
    let mut mem_available: Option<u64> = None;
    let mut mem_free = 0u64;
    let mut mem_buffers = 0u64;
    let mut mem_cached = 0u64;
    for line in parts[2].trim().lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let kb = value
            .trim()
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        match key.trim() {
            "MemTotal" => mem_total = kb * 1024,
            "MemAvailable" => mem_available = Some(kb * 1024),
            "MemFree" => mem_free = kb * 1024,
            "Buffers" => mem_buffers = kb * 1024,
            "Cached" => mem_cached = kb * 1024,
            _ => {}
        }
    }
    let ram_used = match mem_available {
        Some(available) => mem_total.saturating_sub(available),
        None => mem_total.saturating_sub(mem_free + mem_buffers + mem_cached),
    };

    let temp_celsius = parts[3]
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|&millis| millis > 0)
        .map(|millis| millis as f64 / 1000.0);

    let uptime_secs = parts[4]
        .trim()
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0) as u64;

    Some(DeviceMetrics {
        cpu_percent,
        ram_used,
        ram_total: mem_total,
        temp_celsius,
        uptime_secs,
    })
}

/// Match `docker ps` name:state lines against the configured names;
/// unmatched names report "unknown". Exposed for unit tests.
pub fn map_container_states(stdout: &str, configured: &[String]) -> Vec<ContainerStatus> {
    let mut reported = std::collections::HashMap::new();
    for line in stdout.lines() {
        if let Some((name, state)) = line.split_once(':') {
            reported.insert(name.trim().to_string(), state.trim().to_lowercase());
        }
    }
    configured
        .iter()
        .map(|name| ContainerStatus {
            name: name.clone(),
            state: reported
                .get(name)
                .cloned()
                .unwrap_or_else(|| "unknown".into()),
        })
        .collect()
}

// Host registry: the managed set of devices and jobs.
// Read-mostly; structural edits swap state under a short write lock and are
// rewritten to the fleet file. In-flight evaluation passes keep the view they
// started with.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::docker_repo;
use crate::error::FleetError;
use crate::executor::wol;
use crate::models::{Device, Job, JobAction, Precondition, Recurrence};

/// On-disk form of the fleet: devices and jobs, TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetFile {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

pub struct FleetRegistry {
    inner: RwLock<FleetFile>,
    /// None disables persistence (tests).
    path: Option<PathBuf>,
}

impl FleetRegistry {
    /// Load the fleet file, creating it with just the local host on first run.
    /// A local-host entry is inserted if the file has none.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let path_buf = PathBuf::from(path);
        let mut fleet = if path_buf.exists() {
            let s = std::fs::read_to_string(&path_buf)?;
            toml::from_str::<FleetFile>(&s)?
        } else {
            FleetFile::default()
        };
        if !fleet.devices.iter().any(|d| d.is_local) {
            fleet.devices.insert(0, Device::local_host());
        }
        for device in &fleet.devices {
            validate_device(device).map_err(|e| anyhow::anyhow!("fleet file: {e}"))?;
        }
        for job in &fleet.jobs {
            validate_job(job, &fleet.devices).map_err(|e| anyhow::anyhow!("fleet file: {e}"))?;
        }
        let registry = Self {
            inner: RwLock::new(fleet),
            path: Some(path_buf),
        };
        registry.save()?;
        Ok(registry)
    }

    /// In-memory registry seeded with the given fleet; nothing is persisted.
    pub fn in_memory(mut fleet: FleetFile) -> Self {
        if !fleet.devices.iter().any(|d| d.is_local) {
            fleet.devices.insert(0, Device::local_host());
        }
        Self {
            inner: RwLock::new(fleet),
            path: None,
        }
    }

    fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let fleet = self.inner.read().expect("registry lock poisoned");
        let s = toml::to_string_pretty(&*fleet)?;
        std::fs::write(path, s)?;
        Ok(())
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.inner.read().expect("registry lock poisoned").devices.clone()
    }

    pub fn get_device(&self, id: &str) -> Result<Device, FleetError> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| FleetError::UnknownDevice(id.to_string()))
    }

    pub fn local_device(&self) -> Device {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .devices
            .iter()
            .find(|d| d.is_local)
            .cloned()
            .unwrap_or_else(Device::local_host)
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.inner.read().expect("registry lock poisoned").jobs.clone()
    }

    pub fn get_job(&self, id: &str) -> Result<Job, FleetError> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .jobs
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or_else(|| FleetError::UnknownJob(id.to_string()))
    }

    pub fn add_device(&self, device: Device) -> Result<(), FleetError> {
        validate_device(&device)?;
        {
            let mut fleet = self.inner.write().expect("registry lock poisoned");
            if fleet.devices.iter().any(|d| d.id == device.id) {
                return Err(FleetError::ConfigError(format!(
                    "duplicate device id {:?}",
                    device.id
                )));
            }
            if device.is_local && fleet.devices.iter().any(|d| d.is_local) {
                return Err(FleetError::ConfigError(
                    "fleet already has a local host".into(),
                ));
            }
            fleet.devices.push(device);
        }
        self.persist()
    }

    pub fn update_device(&self, device: Device) -> Result<(), FleetError> {
        validate_device(&device)?;
        {
            let mut fleet = self.inner.write().expect("registry lock poisoned");
            let slot = fleet
                .devices
                .iter_mut()
                .find(|d| d.id == device.id)
                .ok_or_else(|| FleetError::UnknownDevice(device.id.clone()))?;
            // Identity and local-host role are stable; address/credentials may change.
            let is_local = slot.is_local;
            *slot = device;
            slot.is_local = is_local;
        }
        self.persist()
    }

    pub fn remove_device(&self, id: &str) -> Result<Device, FleetError> {
        let removed = {
            let mut fleet = self.inner.write().expect("registry lock poisoned");
            let idx = fleet
                .devices
                .iter()
                .position(|d| d.id == id)
                .ok_or_else(|| FleetError::UnknownDevice(id.to_string()))?;
            if fleet.devices[idx].is_local {
                return Err(FleetError::ConfigError(
                    "the local host cannot be removed".into(),
                ));
            }
            if let Some(job) = fleet.jobs.iter().find(|j| job_targets_device(j, id)) {
                return Err(FleetError::ConfigError(format!(
                    "device {id:?} is referenced by job {:?}",
                    job.id
                )));
            }
            fleet.devices.remove(idx)
        };
        self.persist()?;
        Ok(removed)
    }

    pub fn add_job(&self, job: Job) -> Result<(), FleetError> {
        {
            let mut fleet = self.inner.write().expect("registry lock poisoned");
            validate_job(&job, &fleet.devices)?;
            if fleet.jobs.iter().any(|j| j.id == job.id) {
                return Err(FleetError::ConfigError(format!(
                    "duplicate job id {:?}",
                    job.id
                )));
            }
            fleet.jobs.push(job);
        }
        self.persist()
    }

    pub fn update_job(&self, job: Job) -> Result<(), FleetError> {
        {
            let mut fleet = self.inner.write().expect("registry lock poisoned");
            validate_job(&job, &fleet.devices)?;
            let slot = fleet
                .jobs
                .iter_mut()
                .find(|j| j.id == job.id)
                .ok_or_else(|| FleetError::UnknownJob(job.id.clone()))?;
            *slot = job;
        }
        self.persist()
    }

    pub fn remove_job(&self, id: &str) -> Result<Job, FleetError> {
        let removed = {
            let mut fleet = self.inner.write().expect("registry lock poisoned");
            let idx = fleet
                .jobs
                .iter()
                .position(|j| j.id == id)
                .ok_or_else(|| FleetError::UnknownJob(id.to_string()))?;
            fleet.jobs.remove(idx)
        };
        self.persist()?;
        Ok(removed)
    }

    /// Flip enabled and return the new value.
    pub fn toggle_job(&self, id: &str) -> Result<bool, FleetError> {
        let enabled = {
            let mut fleet = self.inner.write().expect("registry lock poisoned");
            let job = fleet
                .jobs
                .iter_mut()
                .find(|j| j.id == id)
                .ok_or_else(|| FleetError::UnknownJob(id.to_string()))?;
            job.enabled = !job.enabled;
            job.enabled
        };
        self.persist()?;
        Ok(enabled)
    }

    fn persist(&self) -> Result<(), FleetError> {
        self.save()
            .map_err(|e| FleetError::ActionError(format!("fleet file write failed: {e}")))
    }
}

fn job_targets_device(job: &Job, device_id: &str) -> bool {
    let action_hit = match &job.action {
        JobAction::Docker { device, .. } | JobAction::Command { device, .. } => device == device_id,
        JobAction::Http { .. } => false,
        JobAction::Backup {
            source_device,
            dest_device,
            ..
        } => source_device == device_id || dest_device == device_id,
    };
    let pre_hit = match &job.precondition {
        Some(Precondition::DeviceOnline { device })
        | Some(Precondition::ContainerRunning { device, .. }) => device == device_id,
        None => false,
    };
    action_hit || pre_hit
}

fn validate_device(device: &Device) -> Result<(), FleetError> {
    if device.id.is_empty() {
        return Err(FleetError::ConfigError("device id must be non-empty".into()));
    }
    if device.address.is_empty() {
        return Err(FleetError::ConfigError(format!(
            "device {:?}: address must be non-empty",
            device.id
        )));
    }
    if !device.is_local && device.ssh.is_none() && device.wol.is_none() {
        return Err(FleetError::ConfigError(format!(
            "device {:?}: a remote device needs ssh or wol configured",
            device.id
        )));
    }
    if let Some(ssh) = &device.ssh {
        if ssh.user.is_empty() {
            return Err(FleetError::ConfigError(format!(
                "device {:?}: ssh.user must be non-empty",
                device.id
            )));
        }
        if ssh.port == 0 {
            return Err(FleetError::ConfigError(format!(
                "device {:?}: ssh.port must be > 0",
                device.id
            )));
        }
    }
    if let Some(wol_cfg) = &device.wol {
        wol::parse_mac(&wol_cfg.mac).map_err(|e| {
            FleetError::ConfigError(format!("device {:?}: invalid wol.mac: {e}", device.id))
        })?;
    }
    for name in &device.containers {
        if !docker_repo::is_valid_container_name(name) {
            return Err(FleetError::ConfigError(format!(
                "device {:?}: invalid container name {name:?}",
                device.id
            )));
        }
    }
    Ok(())
}

fn validate_job(job: &Job, devices: &[Device]) -> Result<(), FleetError> {
    if job.id.is_empty() {
        return Err(FleetError::ConfigError("job id must be non-empty".into()));
    }
    if job.name.is_empty() {
        return Err(FleetError::ConfigError(format!(
            "job {:?}: name must be non-empty",
            job.id
        )));
    }

    let device_exists = |id: &str| devices.iter().any(|d| d.id == id);
    let require_device = |id: &str| -> Result<(), FleetError> {
        if device_exists(id) {
            Ok(())
        } else {
            Err(FleetError::ConfigError(format!(
                "job {:?}: unknown device {id:?}",
                job.id
            )))
        }
    };

    match &job.action {
        JobAction::Docker {
            device, container, ..
        } => {
            require_device(device)?;
            if !docker_repo::is_valid_container_name(container) {
                return Err(FleetError::ConfigError(format!(
                    "job {:?}: invalid container name {container:?}",
                    job.id
                )));
            }
        }
        JobAction::Command {
            device, program, ..
        } => {
            require_device(device)?;
            if program.is_empty() {
                return Err(FleetError::ConfigError(format!(
                    "job {:?}: program must be non-empty",
                    job.id
                )));
            }
        }
        JobAction::Http { url, method } => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(FleetError::ConfigError(format!(
                    "job {:?}: url must be http(s), got {url:?}",
                    job.id
                )));
            }
            if !matches!(method.as_str(), "GET" | "POST" | "PUT" | "DELETE" | "HEAD") {
                return Err(FleetError::ConfigError(format!(
                    "job {:?}: unsupported http method {method:?}",
                    job.id
                )));
            }
        }
        JobAction::Backup {
            source_device,
            source_path,
            dest_device,
            dest_path,
            ..
        } => {
            require_device(source_device)?;
            require_device(dest_device)?;
            if source_path.is_empty() || dest_path.is_empty() {
                return Err(FleetError::ConfigError(format!(
                    "job {:?}: backup paths must be non-empty",
                    job.id
                )));
            }
        }
    }

    match &job.recurrence {
        Recurrence::Interval { every, .. } => {
            if *every == 0 {
                return Err(FleetError::ConfigError(format!(
                    "job {:?}: interval must be > 0",
                    job.id
                )));
            }
        }
        Recurrence::Daily { .. } => {}
        Recurrence::Weekly { days, .. } => {
            if days.is_empty() {
                return Err(FleetError::ConfigError(format!(
                    "job {:?}: weekly recurrence needs at least one day",
                    job.id
                )));
            }
        }
        Recurrence::Cron { expr } => {
            let normalized = crate::scheduler::recurrence::normalize_cron(expr)
                .map_err(|e| FleetError::ConfigError(format!("job {:?}: {e}", job.id)))?;
            cron::Schedule::from_str(&normalized).map_err(|e| {
                FleetError::ConfigError(format!("job {:?}: invalid cron {expr:?}: {e}", job.id))
            })?;
        }
    }

    if let Some(pre) = &job.precondition {
        match pre {
            Precondition::DeviceOnline { device } => require_device(device)?,
            Precondition::ContainerRunning { device, container } => {
                require_device(device)?;
                if !docker_repo::is_valid_container_name(container) {
                    return Err(FleetError::ConfigError(format!(
                        "job {:?}: invalid precondition container {container:?}",
                        job.id
                    )));
                }
            }
        }
    }

    Ok(())
}

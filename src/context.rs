// One explicit context object owning the registry, cache and scheduler.
// Created at process start; torn down by stopping the tick/poll loops and
// draining in-flight workers.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::warn;

use crate::audit::AuditLog;
use crate::config::AppConfig;
use crate::docker_repo::DockerRepo;
use crate::error::FleetError;
use crate::executor::{CommandExecutor, wol};
use crate::models::{ContainerOp, Device, Job, RunRecord, StatusSnapshot};
use crate::notifier::Notifier;
use crate::poller;
use crate::probe::FleetProber;
use crate::registry::FleetRegistry;
use crate::scheduler::actions::FleetActionRunner;
use crate::scheduler::{JobStatus, Scheduler};
use crate::status_cache::StatusCache;

const SSH_CONNECT_TIMEOUT_SECS: u64 = 5;

pub struct AppContext {
    pub config: AppConfig,
    pub registry: Arc<FleetRegistry>,
    pub executor: Arc<CommandExecutor>,
    pub cache: Arc<StatusCache>,
    pub scheduler: Arc<Scheduler>,
    pub runner: Arc<FleetActionRunner>,
    pub audit: Arc<AuditLog>,
}

/// Handles for the background loops; `shutdown` stops and drains them.
pub struct WorkerHandles {
    poller_shutdown: tokio::sync::oneshot::Sender<()>,
    scheduler_shutdown: tokio::sync::oneshot::Sender<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerHandles {
    pub async fn shutdown(self) {
        let _ = self.poller_shutdown.send(());
        let _ = self.scheduler_shutdown.send(());
        join_all(self.handles).await;
    }
}

impl AppContext {
    pub fn new(config: AppConfig) -> anyhow::Result<Arc<Self>> {
        let registry = Arc::new(FleetRegistry::load(&config.fleet.path)?);
        let executor = Arc::new(CommandExecutor::new(SSH_CONNECT_TIMEOUT_SECS));

        let docker = match DockerRepo::connect() {
            Ok(repo) => Some(repo),
            Err(e) => {
                warn!(error = %e, "local docker daemon unavailable; container state degraded");
                None
            }
        };

        let notifier = Arc::new(Notifier::new(config.notifications.clone()));
        let audit = Arc::new(AuditLog::open(&config.audit.path)?);

        let prober = FleetProber::new(
            executor.clone(),
            docker.clone(),
            config.monitoring.probe_timeout_secs,
        );
        let cache = Arc::new(StatusCache::new(
            Arc::new(prober),
            Some(notifier.clone()),
        ));
        for device in registry.list_devices() {
            cache.register(&device.id);
        }

        let runner = Arc::new(FleetActionRunner::new(
            registry.clone(),
            executor.clone(),
            docker,
            config.scheduler.action_timeout_secs,
            config.scheduler.backup_timeout_secs,
        ));
        let scheduler = Arc::new(Scheduler::new(
            registry.clone(),
            runner.clone(),
            Some(notifier),
            Some(audit.clone()),
            config.scheduler.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            registry,
            executor,
            cache,
            scheduler,
            runner,
            audit,
        }))
    }

    pub fn spawn_workers(self: &Arc<Self>) -> WorkerHandles {
        let (poller_shutdown, poller_rx) = tokio::sync::oneshot::channel();
        let (scheduler_shutdown, scheduler_rx) = tokio::sync::oneshot::channel();

        let poller_handle = poller::spawn(
            poller::PollerDeps {
                registry: self.registry.clone(),
                cache: self.cache.clone(),
                shutdown_rx: poller_rx,
            },
            poller::PollerConfig {
                poll_interval_secs: self.config.monitoring.poll_interval_secs,
                stats_log_interval_secs: self.config.monitoring.stats_log_interval_secs,
            },
        );
        let scheduler_handle = self.scheduler.clone().spawn(scheduler_rx);

        WorkerHandles {
            poller_shutdown,
            scheduler_shutdown,
            handles: vec![poller_handle, scheduler_handle],
        }
    }

    // Exposed interface: status

    /// Trigger a coalesced refresh and return the committed snapshot.
    pub async fn refresh_device_status(&self, id: &str) -> Result<StatusSnapshot, FleetError> {
        let device = self.registry.get_device(id)?;
        Ok(self.cache.refresh(&device).await)
    }

    /// Non-blocking read of cached state.
    pub fn get_snapshot(&self, id: &str) -> Result<StatusSnapshot, FleetError> {
        self.registry.get_device(id)?;
        Ok(self.cache.read(id))
    }

    pub fn all_snapshots(&self) -> Vec<StatusSnapshot> {
        self.registry
            .list_devices()
            .iter()
            .map(|d| self.cache.read(&d.id))
            .collect()
    }

    // Exposed interface: registry mutation (snapshot lifecycle follows)

    pub fn add_device(&self, device: Device) -> Result<(), FleetError> {
        let id = device.id.clone();
        self.registry.add_device(device)?;
        self.cache.register(&id);
        Ok(())
    }

    pub fn update_device(&self, device: Device) -> Result<(), FleetError> {
        self.registry.update_device(device)
    }

    pub fn remove_device(&self, id: &str) -> Result<Device, FleetError> {
        let removed = self.registry.remove_device(id)?;
        self.cache.remove(id);
        self.executor.forget_device(id);
        Ok(removed)
    }

    // Exposed interface: privileged device actions

    pub fn wake_device(&self, id: &str) -> Result<(), FleetError> {
        let device = self.registry.get_device(id)?;
        wol::wake(&device)
    }

    pub async fn shutdown_device(&self, id: &str) -> Result<(), FleetError> {
        let device = self.registry.get_device(id)?;
        self.executor.shutdown_device(&device).await
    }

    pub async fn reboot_device(&self, id: &str) -> Result<(), FleetError> {
        let device = self.registry.get_device(id)?;
        self.executor.reboot_device(&device).await
    }

    pub async fn container_action(
        &self,
        id: &str,
        container: &str,
        op: ContainerOp,
    ) -> Result<(), FleetError> {
        let device = self.registry.get_device(id)?;
        self.runner.container_action(&device, container, op).await
    }

    // Exposed interface: jobs

    pub async fn run_job_now(&self, id: &str) -> Result<RunRecord, FleetError> {
        self.scheduler.run_job_now(id).await
    }

    pub fn list_run_history(&self, id: &str) -> Result<Vec<RunRecord>, FleetError> {
        self.scheduler.list_history(id)
    }

    pub fn job_statuses(&self) -> Vec<JobStatus> {
        self.scheduler.list_statuses()
    }

    pub fn add_job(&self, job: Job) -> Result<(), FleetError> {
        self.registry.add_job(job)
    }

    pub fn update_job(&self, job: Job) -> Result<(), FleetError> {
        self.registry.update_job(job)
    }

    pub fn remove_job(&self, id: &str) -> Result<Job, FleetError> {
        self.registry.remove_job(id)
    }

    pub fn toggle_job(&self, id: &str) -> Result<bool, FleetError> {
        self.registry.toggle_job(id)
    }
}

// Job action dispatch. One handler per action kind, matched exhaustively;
// preconditions are checked here too since they probe the same targets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::docker_repo::DockerRepo;
use crate::error::FleetError;
use crate::executor::CommandExecutor;
use crate::models::{ContainerOp, Device, JobAction, Precondition};
use crate::registry::FleetRegistry;

const PING_TIMEOUT_SECS: u64 = 2;
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Runs one job action. Behind a trait so the scheduler is testable with a
/// stub runner.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// `Err(SkippedGuard)` means the action declined to run (e.g. backup
    /// source offline) and the record becomes `skipped`, not `failure`.
    async fn run(&self, action: &JobAction) -> Result<(), FleetError>;

    /// Checked immediately before dispatch; probe failures count as unmet.
    async fn precondition_met(&self, precondition: &Precondition) -> bool;
}

pub struct FleetActionRunner {
    registry: Arc<FleetRegistry>,
    executor: Arc<CommandExecutor>,
    docker: Option<DockerRepo>,
    http: reqwest::Client,
    action_timeout: Duration,
    backup_timeout: Duration,
}

impl FleetActionRunner {
    pub fn new(
        registry: Arc<FleetRegistry>,
        executor: Arc<CommandExecutor>,
        docker: Option<DockerRepo>,
        action_timeout_secs: u64,
        backup_timeout_secs: u64,
    ) -> Self {
        Self {
            registry,
            executor,
            docker,
            http: reqwest::Client::new(),
            action_timeout: Duration::from_secs(action_timeout_secs),
            backup_timeout: Duration::from_secs(backup_timeout_secs),
        }
    }

    /// Container lifecycle on a device, local daemon or remote over ssh.
    /// Also the §6 container-control primitive used by the REST layer.
    pub async fn container_action(
        &self,
        device: &Device,
        container: &str,
        op: ContainerOp,
    ) -> Result<(), FleetError> {
        if device.is_local {
            let docker = self.docker.as_ref().ok_or_else(|| {
                FleetError::ActionError("local docker daemon unavailable".into())
            })?;
            docker.container_action(container, op).await
        } else {
            let args = vec![op.as_str().to_string(), container.to_string()];
            let out = self
                .executor
                .execute(device, "docker", &args, self.action_timeout)
                .await?;
            if out.success() {
                Ok(())
            } else {
                Err(FleetError::ActionError(format!(
                    "docker {} {container} exited {}: {}",
                    op.as_str(),
                    out.exit_code,
                    out.stderr.trim()
                )))
            }
        }
    }

    async fn run_command(
        &self,
        device: &Device,
        program: &str,
        args: &[String],
    ) -> Result<(), FleetError> {
        let out = self
            .executor
            .execute(device, program, args, self.action_timeout)
            .await?;
        if out.success() {
            Ok(())
        } else {
            Err(FleetError::ActionError(format!(
                "{program} exited {}: {}",
                out.exit_code,
                out.stderr.trim()
            )))
        }
    }

    async fn run_http(&self, url: &str, method: &str) -> Result<(), FleetError> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| FleetError::ConfigError(format!("bad http method {method:?}")))?;
        let response = self
            .http
            .request(method, url)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FleetError::Timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
                } else if e.is_connect() {
                    FleetError::Unreachable(format!("{url}: {e}"))
                } else {
                    FleetError::ActionError(format!("{url}: {e}"))
                }
            })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(FleetError::ActionError(format!(
                "{url} returned {}",
                response.status()
            )))
        }
    }

    /// rsync between two devices, run on the control host. Remote legs go
    /// over ssh with the same relaxed host-identity options the executor
    /// uses. A dead source skips the run instead of failing it.
    async fn run_backup(
        &self,
        source_device: &str,
        source_path: &str,
        dest_device: &str,
        dest_path: &str,
        delete: bool,
    ) -> Result<(), FleetError> {
        let source = self.registry.get_device(source_device)?;
        let dest = self.registry.get_device(dest_device)?;

        if !source.is_local && !self.executor.ping(&source, PING_TIMEOUT_SECS).await {
            return Err(FleetError::SkippedGuard(format!(
                "backup source {source_device} offline"
            )));
        }

        let mut args = vec!["-az".to_string(), "--stats".to_string()];
        if delete {
            args.push("--delete".to_string());
        }

        let mut ssh_transport_set = false;
        let mut add_transport = |args: &mut Vec<String>, device: &Device| {
            if ssh_transport_set {
                return;
            }
            if let Some(ssh) = &device.ssh {
                args.push("-e".to_string());
                args.push(format!(
                    "ssh -p {} -o BatchMode=yes -o StrictHostKeyChecking=no -o ConnectTimeout=10",
                    ssh.port
                ));
                ssh_transport_set = true;
            }
        };

        let source_spec = if source.is_local {
            source_path.to_string()
        } else {
            let ssh = source.ssh.as_ref().ok_or_else(|| {
                FleetError::ConfigError(format!("backup source {source_device} has no ssh"))
            })?;
            add_transport(&mut args, &source);
            format!("{}@{}:{}", ssh.user, source.address, source_path)
        };
        let dest_spec = if dest.is_local {
            std::fs::create_dir_all(dest_path)
                .map_err(|e| FleetError::ActionError(format!("mkdir {dest_path}: {e}")))?;
            dest_path.to_string()
        } else {
            let ssh = dest.ssh.as_ref().ok_or_else(|| {
                FleetError::ConfigError(format!("backup dest {dest_device} has no ssh"))
            })?;
            add_transport(&mut args, &dest);
            format!("{}@{}:{}", ssh.user, dest.address, dest_path)
        };

        args.push(source_spec);
        args.push(dest_spec);

        let local = self.registry.local_device();
        let out = self
            .executor
            .execute(&local, "rsync", &args, self.backup_timeout)
            .await?;
        if out.success() {
            debug!(source = source_device, dest = dest_device, "backup complete");
            Ok(())
        } else {
            Err(FleetError::ActionError(format!(
                "rsync exited {}: {}",
                out.exit_code,
                out.stderr.trim()
            )))
        }
    }

    async fn container_running(&self, device: &Device, container: &str) -> bool {
        if device.is_local {
            match &self.docker {
                Some(docker) => {
                    let names = [container.to_string()];
                    docker
                        .status_of(&names)
                        .await
                        .first()
                        .map(|c| c.is_running())
                        .unwrap_or(false)
                }
                None => false,
            }
        } else {
            let args = vec![
                "inspect".to_string(),
                "-f".to_string(),
                "{{.State.Status}}".to_string(),
                container.to_string(),
            ];
            match self
                .executor
                .execute(device, "docker", &args, self.action_timeout)
                .await
            {
                Ok(out) if out.success() => out.stdout.trim() == "running",
                _ => false,
            }
        }
    }
}

#[async_trait]
impl ActionRunner for FleetActionRunner {
    async fn run(&self, action: &JobAction) -> Result<(), FleetError> {
        match action {
            JobAction::Docker {
                device,
                container,
                op,
            } => {
                let device = self.registry.get_device(device)?;
                self.container_action(&device, container, *op).await
            }
            JobAction::Command {
                device,
                program,
                args,
            } => {
                let device = self.registry.get_device(device)?;
                self.run_command(&device, program, args).await
            }
            JobAction::Http { url, method } => self.run_http(url, method).await,
            JobAction::Backup {
                source_device,
                source_path,
                dest_device,
                dest_path,
                delete,
            } => {
                self.run_backup(source_device, source_path, dest_device, dest_path, *delete)
                    .await
            }
        }
    }

    async fn precondition_met(&self, precondition: &Precondition) -> bool {
        match precondition {
            Precondition::DeviceOnline { device } => match self.registry.get_device(device) {
                Ok(device) => self.executor.ping(&device, PING_TIMEOUT_SECS).await,
                Err(_) => false,
            },
            Precondition::ContainerRunning { device, container } => {
                match self.registry.get_device(device) {
                    Ok(device) => self.container_running(&device, container).await,
                    Err(_) => false,
                }
            }
        }
    }
}

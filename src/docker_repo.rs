// Local docker control via bollard

use std::collections::HashMap;

use bollard::Docker;
use bollard::query_parameters::{
    ListContainersOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use tracing::warn;

use crate::error::FleetError;
use crate::models::{ContainerOp, ContainerStatus};

/// Container names docker itself accepts; rejects anything that could smuggle
/// shell metacharacters into a remote invocation.
pub fn is_valid_container_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 128 {
        return false;
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or(' ');
    if !first.is_ascii_alphanumeric() {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[derive(Clone)]
pub struct DockerRepo {
    docker: Docker,
}

impl DockerRepo {
    pub fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_unix_defaults()?;
        Ok(Self { docker })
    }

    /// All containers (running or not) with their lowercase state.
    pub async fn list_containers(&self) -> Vec<ContainerStatus> {
        let filter = ListContainersOptions {
            all: true,
            ..Default::default()
        };
        let containers = match self.docker.list_containers(Some(filter)).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "docker list_containers failed");
                return Vec::new();
            }
        };

        containers
            .iter()
            .map(|c| {
                let name = c
                    .names
                    .as_ref()
                    .and_then(|n| n.first())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .or_else(|| c.id.as_ref().cloned())
                    .unwrap_or_default();
                let state = c
                    .state
                    .as_ref()
                    .map(|s| s.to_string().to_lowercase())
                    .unwrap_or_else(|| "unknown".into());
                ContainerStatus { name, state }
            })
            .collect()
    }

    /// States for the configured names only; configured-but-absent containers
    /// report "unknown" (mirrors what remote `docker ps` probing reports).
    pub async fn status_of(&self, names: &[String]) -> Vec<ContainerStatus> {
        if names.is_empty() {
            return Vec::new();
        }
        let all: HashMap<String, String> = self
            .list_containers()
            .await
            .into_iter()
            .map(|c| (c.name, c.state))
            .collect();
        names
            .iter()
            .map(|name| ContainerStatus {
                name: name.clone(),
                state: all.get(name).cloned().unwrap_or_else(|| "unknown".into()),
            })
            .collect()
    }

    /// One container lifecycle operation on the local docker daemon.
    pub async fn container_action(
        &self,
        name: &str,
        op: ContainerOp,
    ) -> Result<(), FleetError> {
        if !is_valid_container_name(name) {
            return Err(FleetError::ConfigError(format!(
                "invalid container name {name:?}"
            )));
        }
        let result = match op {
            ContainerOp::Start => {
                self.docker
                    .start_container(name, None::<StartContainerOptions>)
                    .await
            }
            ContainerOp::Stop => {
                self.docker
                    .stop_container(name, None::<StopContainerOptions>)
                    .await
            }
            ContainerOp::Restart => {
                self.docker
                    .restart_container(name, None::<RestartContainerOptions>)
                    .await
            }
        };
        result.map_err(|e| FleetError::ActionError(format!("docker {} {name}: {e}", op.as_str())))
    }
}

// Command executor: one whitelisted command against a device, local child
// process or remote over non-interactive ssh, under a hard timeout.

pub mod wol;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::FleetError;
use crate::models::Device;

/// Structured result of one invocation. A non-zero `exit_code` is a normal
/// outcome, not an executor error.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct CommandExecutor {
    connect_timeout_secs: u64,
    /// Per-device in-flight markers. The map lock is held only for the
    /// lookup; the per-device mutex is what serializes the blocking call.
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CommandExecutor {
    pub fn new(connect_timeout_secs: u64) -> Self {
        Self {
            connect_timeout_secs,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    fn device_slot(&self, device_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inflight.lock().expect("executor lock poisoned");
        map.entry(device_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the in-flight marker for a removed device.
    pub fn forget_device(&self, device_id: &str) {
        let mut map = self.inflight.lock().expect("executor lock poisoned");
        map.remove(device_id);
    }

    /// Run `program args...` on `device`. Local targets run as an isolated
    /// child process; remote targets are wrapped in a non-interactive ssh
    /// invocation. At most one call per device is in flight at any time;
    /// concurrent callers queue on the device's marker.
    #[instrument(skip_all, fields(device = %device.id, program))]
    pub async fn execute(
        &self,
        device: &Device,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, FleetError> {
        let slot = self.device_slot(&device.id);
        let _in_flight = slot.lock().await;

        let (bin, argv) = if device.is_local {
            (program.to_string(), args.to_vec())
        } else {
            let ssh = device.ssh.as_ref().ok_or_else(|| {
                FleetError::ConfigError(format!("device {:?} has no ssh configured", device.id))
            })?;
            (
                "ssh".to_string(),
                build_remote_args(&device.address, ssh, self.connect_timeout_secs, program, args),
            )
        };

        let output = run_with_timeout(&bin, &argv, timeout).await?;
        if device.is_local {
            Ok(output)
        } else {
            classify_remote(output)
        }
    }

    /// Reachability probe. The local host is always reachable; remote hosts
    /// answer one ICMP echo within `timeout_secs`.
    #[instrument(skip_all, fields(device = %device.id))]
    pub async fn ping(&self, device: &Device, timeout_secs: u64) -> bool {
        if device.is_local {
            return true;
        }
        let slot = self.device_slot(&device.id);
        let _in_flight = slot.lock().await;

        let args = vec![
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            timeout_secs.to_string(),
            device.address.clone(),
        ];
        match run_with_timeout("ping", &args, Duration::from_secs(timeout_secs + 2)).await {
            Ok(out) => out.success(),
            Err(e) => {
                debug!(device = %device.id, error = %e, "ping failed");
                false
            }
        }
    }

    /// Power the device off. For a remote host a dropped connection or
    /// timeout counts as success: shutdown kills the ssh session.
    pub async fn shutdown_device(&self, device: &Device) -> Result<(), FleetError> {
        self.power_command(device, &["shutdown", "-h", "now"]).await
    }

    pub async fn reboot_device(&self, device: &Device) -> Result<(), FleetError> {
        self.power_command(device, &["reboot"]).await
    }

    async fn power_command(&self, device: &Device, cmd: &[&str]) -> Result<(), FleetError> {
        let args: Vec<String> = cmd.iter().map(|s| s.to_string()).collect();
        match self
            .execute(device, "sudo", &args, Duration::from_secs(30))
            .await
        {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(FleetError::ActionError(truncate_stderr(&out.stderr))),
            Err(FleetError::Timeout(_)) | Err(FleetError::Unreachable(_)) if !device.is_local => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// ssh argument vector for a remote invocation. Host identity verification is
/// relaxed (trusted LAN); BatchMode keeps the call non-interactive. The
/// command and its arguments stay separate vector elements, never a joined
/// shell string.
pub fn build_remote_args(
    address: &str,
    ssh: &crate::models::SshConfig,
    connect_timeout_secs: u64,
    program: &str,
    args: &[String],
) -> Vec<String> {
    let mut argv = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={connect_timeout_secs}"),
        "-p".to_string(),
        ssh.port.to_string(),
    ];
    if let Some(identity) = &ssh.identity_file {
        argv.push("-i".to_string());
        argv.push(identity.clone());
    }
    argv.push(format!("{}@{}", ssh.user, address));
    argv.push(program.to_string());
    argv.extend(args.iter().cloned());
    argv
}

/// Spawn and await the child under the hard timeout. On timeout the future is
/// dropped, which kills the child (`kill_on_drop`); for ssh that tears down
/// the remote session as well. Returns `Timeout`, never a partial result.
async fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, FleetError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| FleetError::ActionError(format!("spawn {program}: {e}")))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_) => Err(FleetError::Timeout(timeout)),
        Ok(Err(e)) => Err(FleetError::ActionError(format!("wait {program}: {e}"))),
        Ok(Ok(out)) => Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            exit_code: out.status.code().unwrap_or(-1),
        }),
    }
}

/// ssh reserves exit 255 for client-level failure; split it into the
/// executor taxonomy. Anything else is the remote command's own exit code.
fn classify_remote(output: CommandOutput) -> Result<CommandOutput, FleetError> {
    if output.exit_code != 255 {
        return Ok(output);
    }
    let stderr = output.stderr.to_lowercase();
    if stderr.contains("permission denied")
        || stderr.contains("authentication")
        || stderr.contains("host key verification failed")
    {
        Err(FleetError::AuthFailure(truncate_stderr(&output.stderr)))
    } else {
        Err(FleetError::Unreachable(truncate_stderr(&output.stderr)))
    }
}

fn truncate_stderr(stderr: &str) -> String {
    let s = stderr.trim();
    if s.chars().count() > 200 {
        let head: String = s.chars().take(200).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

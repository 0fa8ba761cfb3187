// Audit sink: JSON-lines records of mutating actions and job outcomes

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use tracing::warn;

/// Closed set of auditable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DeviceAdd,
    DeviceUpdate,
    DeviceRemove,
    DeviceWake,
    DeviceShutdown,
    DeviceReboot,
    ContainerAction,
    JobAdd,
    JobUpdate,
    JobRemove,
    JobToggle,
    JobRun,
    ServerStart,
    ServerStop,
}

#[derive(Debug, Serialize)]
struct AuditEvent<'a> {
    timestamp: String,
    action: AuditAction,
    target: &'a str,
    outcome: &'a str,
    actor: &'a str,
}

/// Appends one JSON object per line. An empty path disables the file and the
/// events go to the log only.
pub struct AuditLog {
    path: Option<PathBuf>,
    file: Mutex<Option<std::fs::File>>,
}

impl AuditLog {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        if path.is_empty() {
            return Ok(Self {
                path: None,
                file: Mutex::new(None),
            });
        }
        let path_buf = PathBuf::from(path);
        if let Some(parent) = path_buf.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path_buf)?;
        Ok(Self {
            path: Some(path_buf),
            file: Mutex::new(Some(file)),
        })
    }

    pub fn record(&self, action: AuditAction, target: &str, outcome: &str, actor: &str) {
        let event = AuditEvent {
            timestamp: chrono::Local::now().to_rfc3339(),
            action,
            target,
            outcome,
            actor,
        };
        tracing::info!(
            target: "audit",
            action = ?action,
            target_id = target,
            outcome,
            actor,
            "audit event"
        );
        let Some(path) = &self.path else {
            return;
        };
        let Ok(line) = serde_json::to_string(&event) else {
            return;
        };
        let mut guard = self.file.lock().expect("audit lock poisoned");
        if let Some(file) = guard.as_mut()
            && let Err(e) = writeln!(file, "{line}")
        {
            warn!(path = %path.display(), error = %e, "audit write failed");
        }
    }
}

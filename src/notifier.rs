// Notification dispatch: ntfy and/or a generic webhook

use serde_json::json;
use tracing::{debug, warn};

use crate::config::NotificationsConfig;
use crate::models::{RunOutcome, RunRecord};
use crate::status_cache::Transition;

#[derive(Debug, Clone, Copy)]
enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    fn ntfy_priority(self) -> u8 {
        match self {
            Level::Info => 2,
            Level::Warning => 3,
            Level::Error => 4,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }
}

pub struct Notifier {
    config: NotificationsConfig,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotificationsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub async fn notify_transition(&self, transition: &Transition) {
        let (title, message, level) = match transition {
            Transition::DeviceOffline { device } => (
                "Device offline".to_string(),
                format!("{device} stopped responding"),
                Level::Warning,
            ),
            Transition::DeviceOnline { device } => (
                "Device online".to_string(),
                format!("{device} is back"),
                Level::Info,
            ),
            Transition::ContainerStopped { device, container } => (
                "Container stopped".to_string(),
                format!("{container} on {device} is no longer running"),
                Level::Warning,
            ),
        };
        self.send(&title, &message, level).await;
    }

    /// Failures always notify; successes only when configured. Skips stay quiet.
    pub async fn notify_job_outcome(&self, job_name: &str, record: &RunRecord) {
        match record.outcome {
            RunOutcome::Failure => {
                let detail = record.error.as_deref().unwrap_or("unknown error");
                self.send(
                    &format!("Job failed: {job_name}"),
                    detail,
                    Level::Error,
                )
                .await;
            }
            RunOutcome::Success if self.config.notify_on_success => {
                self.send(
                    &format!("Job succeeded: {job_name}"),
                    "completed",
                    Level::Info,
                )
                .await;
            }
            _ => {}
        }
    }

    async fn send(&self, title: &str, message: &str, level: Level) {
        if !self.config.enabled {
            return;
        }
        if let Some(ntfy) = &self.config.ntfy {
            let url = format!("{}/{}", ntfy.server.trim_end_matches('/'), ntfy.topic);
            let mut req = self
                .client
                .post(&url)
                .header("Title", title)
                .header("Priority", level.ntfy_priority().to_string())
                .body(message.to_string());
            if let Some(token) = &ntfy.token {
                req = req.bearer_auth(token);
            }
            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(provider = "ntfy", title, "notification sent")
                }
                Ok(resp) => warn!(provider = "ntfy", status = %resp.status(), "notification rejected"),
                Err(e) => warn!(provider = "ntfy", error = %e, "notification failed"),
            }
        }
        if let Some(webhook) = &self.config.webhook {
            let body = json!({
                "title": title,
                "message": message,
                "level": level.as_str(),
            });
            match self.client.post(&webhook.url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(provider = "webhook", title, "notification sent")
                }
                Ok(resp) => {
                    warn!(provider = "webhook", status = %resp.status(), "notification rejected")
                }
                Err(e) => warn!(provider = "webhook", error = %e, "notification failed"),
            }
        }
    }
}

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub fleet: FleetConfig,
    pub monitoring: MonitoringConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// TOML file holding devices and jobs; rewritten on registry mutation.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Fixed poll cadence: one coalesced refresh per device per tick.
    pub poll_interval_secs: u64,
    /// Hard timeout for one status probe (ssh + parse) per device.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// How often to log app stats (devices polled, jobs run) at INFO level.
    pub stats_log_interval_secs: u64,
}

fn default_probe_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Due-tick granularity. Finer than any recurrence; 1000 in production,
    /// lower in tests.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// RunRecords kept per job; oldest evicted first.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Default hard timeout for command/docker actions.
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
    /// Hard timeout for backup (rsync) actions.
    #[serde(default = "default_backup_timeout_secs")]
    pub backup_timeout_secs: u64,
    /// What happens to next_run when a precondition is unmet:
    /// "advance" keeps the normal schedule, "retry" re-arms after
    /// `precondition_retry_secs`.
    #[serde(default = "default_precondition_policy")]
    pub precondition_policy: PreconditionPolicy,
    #[serde(default = "default_precondition_retry_secs")]
    pub precondition_retry_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreconditionPolicy {
    Advance,
    Retry,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_history_limit() -> usize {
    20
}

fn default_action_timeout_secs() -> u64 {
    60
}

fn default_backup_timeout_secs() -> u64 {
    3600
}

fn default_precondition_policy() -> PreconditionPolicy {
    PreconditionPolicy::Advance
}

fn default_precondition_retry_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditConfig {
    /// JSON-lines audit log; empty disables the file sink.
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Also notify on job success, not only failure.
    #[serde(default)]
    pub notify_on_success: bool,
    #[serde(default)]
    pub ntfy: Option<NtfyConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NtfyConfig {
    #[serde(default = "default_ntfy_server")]
    pub server: String,
    pub topic: String,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_ntfy_server() -> String {
    "https://ntfy.sh".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(!self.fleet.path.is_empty(), "fleet.path must be non-empty");
        anyhow::ensure!(
            self.monitoring.poll_interval_secs > 0,
            "monitoring.poll_interval_secs must be > 0, got {}",
            self.monitoring.poll_interval_secs
        );
        anyhow::ensure!(
            self.monitoring.probe_timeout_secs > 0,
            "monitoring.probe_timeout_secs must be > 0, got {}",
            self.monitoring.probe_timeout_secs
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.scheduler.tick_interval_ms > 0,
            "scheduler.tick_interval_ms must be > 0, got {}",
            self.scheduler.tick_interval_ms
        );
        anyhow::ensure!(
            self.scheduler.history_limit > 0,
            "scheduler.history_limit must be > 0, got {}",
            self.scheduler.history_limit
        );
        anyhow::ensure!(
            self.scheduler.action_timeout_secs > 0,
            "scheduler.action_timeout_secs must be > 0, got {}",
            self.scheduler.action_timeout_secs
        );
        anyhow::ensure!(
            self.scheduler.backup_timeout_secs > 0,
            "scheduler.backup_timeout_secs must be > 0, got {}",
            self.scheduler.backup_timeout_secs
        );
        anyhow::ensure!(
            self.scheduler.precondition_retry_secs > 0,
            "scheduler.precondition_retry_secs must be > 0, got {}",
            self.scheduler.precondition_retry_secs
        );
        if let Some(ntfy) = &self.notifications.ntfy {
            anyhow::ensure!(
                !ntfy.topic.is_empty(),
                "notifications.ntfy.topic must be non-empty when configured"
            );
        }
        if let Some(webhook) = &self.notifications.webhook {
            anyhow::ensure!(
                !webhook.url.is_empty(),
                "notifications.webhook.url must be non-empty when configured"
            );
        }
        Ok(())
    }
}

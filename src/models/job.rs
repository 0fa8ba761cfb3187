// Scheduled jobs: typed actions, recurrence rules, run records

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Container lifecycle operation; matched exhaustively by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerOp {
    Start,
    Stop,
    Restart,
}

impl ContainerOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerOp::Start => "start",
            ContainerOp::Stop => "stop",
            ContainerOp::Restart => "restart",
        }
    }
}

/// What a job does when it fires. Closed set: adding a kind means adding a
/// variant and a handler arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobAction {
    /// Container lifecycle on a device (local or remote).
    Docker {
        device: String,
        container: String,
        op: ContainerOp,
    },
    /// One whitelisted command on a device, argument vector only.
    Command {
        device: String,
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// HTTP request expected to return a success status.
    Http {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
    },
    /// rsync between two devices; remote legs go over ssh.
    Backup {
        source_device: String,
        source_path: String,
        dest_device: String,
        dest_path: String,
        #[serde(default)]
        delete: bool,
    },
}

fn default_http_method() -> String {
    "GET".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    pub fn to_seconds(self, n: u64) -> u64 {
        match self {
            IntervalUnit::Seconds => n,
            IntervalUnit::Minutes => n * 60,
            IntervalUnit::Hours => n * 3600,
            IntervalUnit::Days => n * 86_400,
        }
    }
}

/// When a job is due. Time-of-day fields accept "HH:MM" or "HH:MM:SS".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Recurrence {
    Interval {
        every: u64,
        unit: IntervalUnit,
    },
    Daily {
        #[serde(with = "hhmm")]
        time: NaiveTime,
    },
    Weekly {
        days: Vec<Weekday>,
        #[serde(with = "hhmm")]
        time: NaiveTime,
    },
    /// 5-field cron expression (minute hour day-of-month month day-of-week).
    Cron {
        expr: String,
    },
}

/// Checked right before dispatch; unmet means the run is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Precondition {
    DeviceOnline { device: String },
    ContainerRunning { device: String, container: String },
}

/// A schedulable unit of work. `last_run`/`next_run` are scheduler runtime
/// state, not fields of the definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub name: String,
    pub action: JobAction,
    pub recurrence: Recurrence,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<Precondition>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Failure,
    Skipped,
}

/// One execution attempt. Immutable once written; evicted only by ring
/// rotation in the scheduler's bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub job_id: String,
    pub started_at: u64,
    pub finished_at: u64,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serde helper: time-of-day as "HH:MM", accepting "HH:MM:SS" on input.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(t: &NaiveTime, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(de)?;
        NaiveTime::parse_from_str(&s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map_err(|e| D::Error::custom(format!("invalid time-of-day {s:?}: {e}")))
    }
}

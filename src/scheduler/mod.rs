// Job scheduler: a fine-granularity due-tick evaluator dispatching each due
// action onto its own worker. State transitions happen under short critical
// sections; the blocking action I/O never runs while a lock is held.

pub mod actions;
pub mod recurrence;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{Duration, interval};
use tracing::{debug, warn};

use crate::audit::{AuditAction, AuditLog};
use crate::config::{PreconditionPolicy, SchedulerConfig};
use crate::error::FleetError;
use crate::models::{Job, RunOutcome, RunRecord, now_ms};
use crate::notifier::Notifier;
use crate::registry::FleetRegistry;
use actions::ActionRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Disabled,
    Idle,
    Running,
}

struct JobEntry {
    state: JobState,
    next_run: Option<DateTime<Local>>,
    last_run: Option<DateTime<Local>>,
}

impl JobEntry {
    fn new() -> Self {
        JobEntry {
            state: JobState::Disabled,
            next_run: None,
            last_run: None,
        }
    }
}

/// Runtime view of one job, merged from the definition and scheduler state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub state: JobState,
    pub next_run: Option<DateTime<Local>>,
    pub last_run: Option<DateTime<Local>>,
}

enum Begin {
    Fire,
    Skipped(RunRecord),
}

pub struct Scheduler {
    registry: Arc<FleetRegistry>,
    runner: Arc<dyn ActionRunner>,
    notifier: Option<Arc<Notifier>>,
    audit: Option<Arc<AuditLog>>,
    config: SchedulerConfig,
    entries: Mutex<HashMap<String, JobEntry>>,
    history: Mutex<HashMap<String, VecDeque<RunRecord>>>,
    runs_total: AtomicU64,
}

impl Scheduler {
    pub fn new(
        registry: Arc<FleetRegistry>,
        runner: Arc<dyn ActionRunner>,
        notifier: Option<Arc<Notifier>>,
        audit: Option<Arc<AuditLog>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            runner,
            notifier,
            audit,
            config,
            entries: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            runs_total: AtomicU64::new(0),
        }
    }

    /// Spawn the due-tick loop. On shutdown the loop stops evaluating and
    /// drains in-flight workers before the task exits.
    pub fn spawn(
        self: Arc<Self>,
        mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_millis(self.config.tick_interval_ms));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut workers: JoinSet<()> = JoinSet::new();

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        while workers.try_join_next().is_some() {}
                        self.tick(&mut workers);
                    }
                    _ = &mut shutdown_rx => {
                        debug!("scheduler shutting down");
                        break;
                    }
                }
            }
            while workers.join_next().await.is_some() {}
        })
    }

    /// One evaluation pass. Registry edits made after the pass started are
    /// seen by the next one, never retroactively.
    fn tick(self: &Arc<Self>, workers: &mut JoinSet<()>) {
        let now = Local::now();
        let jobs = self.registry.list_jobs();

        let due: Vec<Job> = {
            let mut entries = self.entries.lock().expect("scheduler lock poisoned");
            sync_entries(&mut entries, &jobs, &now);
            jobs.iter()
                .filter(|job| job.enabled)
                .filter(|job| {
                    entries
                        .get(&job.id)
                        .is_some_and(|e| e.next_run.is_some_and(|n| n <= now))
                })
                .cloned()
                .collect()
        };

        for job in due {
            match self.begin_run(&job, now) {
                Begin::Fire => {
                    let scheduler = self.clone();
                    workers.spawn(async move {
                        scheduler.run_to_record(job, now).await;
                    });
                }
                Begin::Skipped(_) => {}
            }
        }
    }

    /// Overlap guard + fire transition, under the entries lock only.
    /// A job already `Running` yields a skipped record and its `next_run`
    /// still advances from this tick's time.
    fn begin_run(&self, job: &Job, now: DateTime<Local>) -> Begin {
        let skipped = {
            let mut entries = self.entries.lock().expect("scheduler lock poisoned");
            let entry = entries.entry(job.id.clone()).or_insert_with(JobEntry::new);
            if entry.state == JobState::Running {
                if job.enabled {
                    entry.next_run = recurrence::next_run_after_fire(&job.recurrence, &now);
                }
                let ms = now_ms();
                Some(RunRecord {
                    job_id: job.id.clone(),
                    started_at: ms,
                    finished_at: ms,
                    outcome: RunOutcome::Skipped,
                    error: Some("previous run still in progress".into()),
                })
            } else {
                entry.state = JobState::Running;
                entry.last_run = Some(now);
                // Computed from the actual fire time, so catch-up fires
                // cannot stack.
                entry.next_run = if job.enabled {
                    recurrence::next_run_after_fire(&job.recurrence, &now)
                } else {
                    None
                };
                None
            }
        };
        match skipped {
            Some(record) => {
                debug!(job = %job.id, "due tick skipped; already running");
                self.append_record(&record);
                Begin::Skipped(record)
            }
            None => Begin::Fire,
        }
    }

    /// Worker body: precondition, dispatch, record, transition back to idle.
    async fn run_to_record(self: Arc<Self>, job: Job, fired_at: DateTime<Local>) -> RunRecord {
        let started_at = now_ms();

        if let Some(precondition) = &job.precondition
            && !self.runner.precondition_met(precondition).await
        {
            let ms = now_ms();
            let record = RunRecord {
                job_id: job.id.clone(),
                started_at,
                finished_at: ms,
                outcome: RunOutcome::Skipped,
                error: Some("precondition unmet".into()),
            };
            self.finish_run(&job, &record, fired_at, true).await;
            return record;
        }

        debug!(job = %job.id, name = %job.name, "dispatching job action");
        self.runs_total.fetch_add(1, Ordering::Relaxed);
        let result = self.runner.run(&job.action).await;
        let finished_at = now_ms();

        let (outcome, error) = match result {
            Ok(()) => (RunOutcome::Success, None),
            Err(FleetError::SkippedGuard(msg)) => (RunOutcome::Skipped, Some(msg)),
            Err(e) => {
                warn!(job = %job.id, error = %e, "job action failed");
                (RunOutcome::Failure, Some(e.to_string()))
            }
        };
        let record = RunRecord {
            job_id: job.id.clone(),
            started_at,
            finished_at,
            outcome,
            error,
        };
        self.finish_run(&job, &record, fired_at, false).await;
        record
    }

    async fn finish_run(
        &self,
        job: &Job,
        record: &RunRecord,
        fired_at: DateTime<Local>,
        precondition_skip: bool,
    ) {
        {
            let mut entries = self.entries.lock().expect("scheduler lock poisoned");
            if let Some(entry) = entries.get_mut(&job.id) {
                entry.state = JobState::Idle;
                if precondition_skip
                    && job.enabled
                    && self.config.precondition_policy == PreconditionPolicy::Retry
                {
                    entry.next_run = Some(
                        fired_at
                            + chrono::Duration::seconds(
                                self.config.precondition_retry_secs as i64,
                            ),
                    );
                }
            }
        }
        self.append_record(record);
        if let Some(notifier) = &self.notifier {
            notifier.notify_job_outcome(&job.name, record).await;
        }
    }

    fn append_record(&self, record: &RunRecord) {
        {
            let mut history = self.history.lock().expect("scheduler lock poisoned");
            let ring = history.entry(record.job_id.clone()).or_default();
            ring.push_back(record.clone());
            while ring.len() > self.config.history_limit {
                ring.pop_front();
            }
        }
        if let Some(audit) = &self.audit {
            audit.record(
                AuditAction::JobRun,
                &record.job_id,
                outcome_str(record.outcome),
                "scheduler",
            );
        }
    }

    /// Manual trigger: bypasses the due-time check but still honors the
    /// overlap guard. Returns the resulting record, `skipped` when the job
    /// is already running.
    pub async fn run_job_now(self: &Arc<Self>, id: &str) -> Result<RunRecord, FleetError> {
        let job = self.registry.get_job(id)?;
        let now = Local::now();
        match self.begin_run(&job, now) {
            Begin::Skipped(record) => Ok(record),
            Begin::Fire => Ok(self.clone().run_to_record(job, now).await),
        }
    }

    /// Bounded recent history, oldest first.
    pub fn list_history(&self, id: &str) -> Result<Vec<RunRecord>, FleetError> {
        self.registry.get_job(id)?;
        let history = self.history.lock().expect("scheduler lock poisoned");
        Ok(history
            .get(id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn job_status(&self, id: &str) -> Result<JobStatus, FleetError> {
        let job = self.registry.get_job(id)?;
        Ok(self.status_of(&job))
    }

    pub fn list_statuses(&self) -> Vec<JobStatus> {
        self.registry
            .list_jobs()
            .iter()
            .map(|job| self.status_of(job))
            .collect()
    }

    fn status_of(&self, job: &Job) -> JobStatus {
        let entries = self.entries.lock().expect("scheduler lock poisoned");
        let entry = entries.get(&job.id);
        JobStatus {
            id: job.id.clone(),
            name: job.name.clone(),
            enabled: job.enabled,
            state: entry.map_or(
                if job.enabled {
                    JobState::Idle
                } else {
                    JobState::Disabled
                },
                |e| e.state,
            ),
            next_run: entry.and_then(|e| e.next_run),
            last_run: entry.and_then(|e| e.last_run),
        }
    }

    pub fn runs_total(&self) -> u64 {
        self.runs_total.load(Ordering::Relaxed)
    }
}

/// Reconcile entries with the registry's current job list. New enabled jobs
/// get a first `next_run`; disabled jobs drop theirs; entries for removed
/// jobs are pruned once no run is in flight.
fn sync_entries(
    entries: &mut HashMap<String, JobEntry>,
    jobs: &[Job],
    now: &DateTime<Local>,
) {
    entries.retain(|id, entry| {
        jobs.iter().any(|j| &j.id == id) || entry.state == JobState::Running
    });
    for job in jobs {
        let entry = entries.entry(job.id.clone()).or_insert_with(JobEntry::new);
        if job.enabled {
            if entry.state == JobState::Disabled {
                entry.state = JobState::Idle;
                entry.next_run = recurrence::initial_next_run(&job.recurrence, now);
            } else if entry.state == JobState::Idle && entry.next_run.is_none() {
                // Re-enabled after a manual run while disabled.
                entry.next_run = recurrence::initial_next_run(&job.recurrence, now);
            }
        } else if entry.state != JobState::Running {
            entry.state = JobState::Disabled;
            entry.next_run = None;
        }
    }
}

fn outcome_str(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Success => "success",
        RunOutcome::Failure => "failure",
        RunOutcome::Skipped => "skipped",
    }
}

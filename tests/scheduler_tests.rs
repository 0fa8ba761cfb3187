// Scheduler tests: due firing, overlap guard, manual runs, preconditions,
// bounded history. Uses a stub runner; intervals are short real time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use fleetdeck::config::{PreconditionPolicy, SchedulerConfig};
use fleetdeck::error::FleetError;
use fleetdeck::models::{
    IntervalUnit, Job, JobAction, Precondition, Recurrence, RunOutcome,
};
use fleetdeck::registry::{FleetFile, FleetRegistry};
use fleetdeck::scheduler::actions::ActionRunner;
use fleetdeck::scheduler::{JobState, Scheduler};

struct MockRunner {
    runs: AtomicU64,
    delay_ms: u64,
    fail: AtomicBool,
    precondition_ok: AtomicBool,
}

impl MockRunner {
    fn new(delay_ms: u64) -> Self {
        Self {
            runs: AtomicU64::new(0),
            delay_ms,
            fail: AtomicBool::new(false),
            precondition_ok: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl ActionRunner for MockRunner {
    async fn run(&self, _action: &JobAction) -> Result<(), FleetError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            Err(FleetError::ActionError("mock failure".into()))
        } else {
            Ok(())
        }
    }

    async fn precondition_met(&self, _precondition: &Precondition) -> bool {
        self.precondition_ok.load(Ordering::SeqCst)
    }
}

fn echo_job(id: &str, every_secs: u64, enabled: bool) -> Job {
    Job {
        id: id.into(),
        name: format!("{id} job"),
        action: JobAction::Command {
            device: "local".into(),
            program: "echo".into(),
            args: vec!["tick".into()],
        },
        recurrence: Recurrence::Interval {
            every: every_secs,
            unit: IntervalUnit::Seconds,
        },
        enabled,
        precondition: None,
    }
}

fn test_config(tick_interval_ms: u64, history_limit: usize) -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_ms,
        history_limit,
        action_timeout_secs: 60,
        backup_timeout_secs: 3600,
        precondition_policy: PreconditionPolicy::Advance,
        precondition_retry_secs: 300,
    }
}

fn build(jobs: Vec<Job>, runner: Arc<MockRunner>, config: SchedulerConfig) -> Arc<Scheduler> {
    let registry = Arc::new(FleetRegistry::in_memory(FleetFile {
        devices: Vec::new(),
        jobs,
    }));
    Arc::new(Scheduler::new(registry, runner, None, None, config))
}

#[tokio::test]
async fn due_job_fires_and_records_success() {
    let runner = Arc::new(MockRunner::new(0));
    let scheduler = build(
        vec![echo_job("j1", 1, true)],
        runner.clone(),
        test_config(50, 20),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = scheduler.clone().spawn(shutdown_rx);

    tokio::time::sleep(tokio::time::Duration::from_millis(1500)).await;
    let _ = shutdown_tx.send(());
    handle.await.unwrap();

    assert!(runner.runs.load(Ordering::SeqCst) >= 1, "interval job fired");
    let history = scheduler.list_history("j1").unwrap();
    assert!(!history.is_empty());
    assert!(
        history.iter().all(|r| r.outcome == RunOutcome::Success),
        "all runs succeeded"
    );
    let status = scheduler.job_status("j1").unwrap();
    assert_eq!(status.state, JobState::Idle);
    assert!(status.next_run.is_some());
    assert!(status.last_run.is_some());
}

#[tokio::test]
async fn disabled_job_never_fires() {
    let runner = Arc::new(MockRunner::new(0));
    let scheduler = build(
        vec![echo_job("j1", 1, false)],
        runner.clone(),
        test_config(50, 20),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = scheduler.clone().spawn(shutdown_rx);
    tokio::time::sleep(tokio::time::Duration::from_millis(1300)).await;
    let _ = shutdown_tx.send(());
    handle.await.unwrap();

    assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
    let status = scheduler.job_status("j1").unwrap();
    assert_eq!(status.state, JobState::Disabled);
    assert!(status.next_run.is_none());
}

#[tokio::test]
async fn overlap_guard_skips_while_running_and_executions_never_overlap() {
    // Action takes ~2.5 periods: due ticks during the run must be recorded
    // as skipped without starting a second execution.
    let runner = Arc::new(MockRunner::new(2500));
    let scheduler = build(
        vec![echo_job("j1", 1, true)],
        runner.clone(),
        test_config(50, 50),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = scheduler.clone().spawn(shutdown_rx);
    tokio::time::sleep(tokio::time::Duration::from_millis(4200)).await;
    let _ = shutdown_tx.send(());
    handle.await.unwrap();

    let history = scheduler.list_history("j1").unwrap();
    let skipped: Vec<_> = history
        .iter()
        .filter(|r| r.outcome == RunOutcome::Skipped)
        .collect();
    assert!(
        !skipped.is_empty(),
        "due ticks during a long run are recorded as skipped"
    );
    assert!(
        skipped
            .iter()
            .all(|r| r.error.as_deref() == Some("previous run still in progress"))
    );

    // Executed (non-skipped) runs never overlap in [started_at, finished_at].
    let mut executed: Vec<_> = history
        .iter()
        .filter(|r| r.outcome != RunOutcome::Skipped)
        .collect();
    executed.sort_by_key(|r| r.started_at);
    for pair in executed.windows(2) {
        assert!(
            pair[0].finished_at <= pair[1].started_at,
            "executions overlap: {pair:?}"
        );
    }
}

#[tokio::test]
async fn run_job_now_on_running_job_returns_skipped() {
    let runner = Arc::new(MockRunner::new(500));
    // Disabled so the tick loop cannot interfere; manual runs bypass the
    // due-time check either way.
    let scheduler = build(vec![echo_job("j1", 3600, false)], runner.clone(), test_config(1000, 20));

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_job_now("j1").await })
    };
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    let second = scheduler.run_job_now("j1").await.unwrap();
    assert_eq!(second.outcome, RunOutcome::Skipped);
    assert_eq!(
        runner.runs.load(Ordering::SeqCst),
        1,
        "no second execution started"
    );

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.outcome, RunOutcome::Success);
}

#[tokio::test]
async fn run_job_now_unknown_job_errors() {
    let runner = Arc::new(MockRunner::new(0));
    let scheduler = build(Vec::new(), runner, test_config(1000, 20));
    let err = scheduler.run_job_now("ghost").await.unwrap_err();
    assert!(matches!(err, FleetError::UnknownJob(_)));
}

#[tokio::test]
async fn unmet_precondition_skips_without_dispatching() {
    let runner = Arc::new(MockRunner::new(0));
    runner.precondition_ok.store(false, Ordering::SeqCst);

    let mut job = echo_job("j1", 3600, false);
    job.precondition = Some(Precondition::DeviceOnline {
        device: "local".into(),
    });
    let scheduler = build(vec![job], runner.clone(), test_config(1000, 20));

    let record = scheduler.run_job_now("j1").await.unwrap();
    assert_eq!(record.outcome, RunOutcome::Skipped);
    assert_eq!(record.error.as_deref(), Some("precondition unmet"));
    assert_eq!(
        runner.runs.load(Ordering::SeqCst),
        0,
        "action runner must not be invoked"
    );
}

#[tokio::test]
async fn failed_action_records_failure_and_returns_to_idle() {
    let runner = Arc::new(MockRunner::new(0));
    runner.fail.store(true, Ordering::SeqCst);
    let scheduler = build(vec![echo_job("j1", 3600, true)], runner, test_config(1000, 20));

    let record = scheduler.run_job_now("j1").await.unwrap();
    assert_eq!(record.outcome, RunOutcome::Failure);
    assert!(record.error.as_deref().unwrap_or("").contains("mock failure"));

    let status = scheduler.job_status("j1").unwrap();
    assert_eq!(status.state, JobState::Idle);
}

#[tokio::test]
async fn history_is_a_bounded_ring_evicting_oldest_first() {
    let runner = Arc::new(MockRunner::new(0));
    let scheduler = build(vec![echo_job("j1", 3600, false)], runner, test_config(1000, 3));

    let mut started = Vec::new();
    for _ in 0..5 {
        let record = scheduler.run_job_now("j1").await.unwrap();
        started.push(record.started_at);
        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
    }

    let history = scheduler.list_history("j1").unwrap();
    assert_eq!(history.len(), 3, "ring keeps the configured limit");
    let kept: Vec<u64> = history.iter().map(|r| r.started_at).collect();
    assert_eq!(
        kept,
        started[2..].to_vec(),
        "oldest records were evicted first"
    );
}

#[tokio::test]
async fn manual_run_advances_next_run_for_enabled_jobs() {
    let runner = Arc::new(MockRunner::new(0));
    let scheduler = build(
        vec![echo_job("j1", 3600, true)],
        runner,
        test_config(1000, 20),
    );

    let record = scheduler.run_job_now("j1").await.unwrap();
    assert_eq!(record.outcome, RunOutcome::Success);

    let status = scheduler.job_status("j1").unwrap();
    let next_run = status.next_run.expect("enabled job keeps a next_run");
    assert!(next_run > chrono::Local::now(), "next_run is in the future");
}

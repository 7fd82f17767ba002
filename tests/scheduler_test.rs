//! Integration tests for the job scheduler and health monitor
//!
//! These tests validate:
//! - Execution records for interval and on-demand runs
//! - Registration rules and deregistration
//! - Shutdown draining of critical jobs
//! - Stalled job restarts, failed job retriggers and backlog signals

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use common::Fixture;
use content_pipeline::config::HealthConfig;
use content_pipeline::core::jobs::{
    BacklogProbe, HealthMonitor, HealthSignal, JobHandler, JobReport, JobScheduler, JobSpec,
    Scheduler,
};
use content_pipeline::core::model::{JobStatus, JobType};
use content_pipeline::core::{PipelineError, PipelineStore};
use content_pipeline::runtime::TokioSpawner;

// ============================================================================
// TEST HANDLERS
// ============================================================================

/// Counts runs; fails the first `fail_first` of them and sleeps `delay` each time.
#[derive(Default)]
struct CountingHandler {
    runs: AtomicUsize,
    fail_first: usize,
    delay: Option<Duration>,
}

impl CountingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_first: times,
            ..Self::default()
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn run(&self) -> Result<JobReport, PipelineError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if run <= self.fail_first {
            return Err(PipelineError::Backend(format!("run {run} exploded")));
        }
        Ok(JobReport {
            processed: run,
            failed: 0,
        })
    }
}

struct FixedBacklog(u64);

impl BacklogProbe for FixedBacklog {
    fn critical_depth(&self) -> u64 {
        self.0
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn scheduler(fx: &Fixture) -> Arc<JobScheduler<TokioSpawner>> {
    Arc::new(JobScheduler::new(
        fx.dyn_store(),
        fx.activity.clone(),
        fx.shared_clock(),
        TokioSpawner::current(),
    ))
}

fn monitor(fx: &Fixture, scheduler: &Arc<JobScheduler<TokioSpawner>>) -> HealthMonitor {
    HealthMonitor::new(
        Arc::clone(scheduler) as Arc<dyn Scheduler>,
        fx.dyn_store(),
        fx.activity.clone(),
        fx.shared_clock(),
        HealthConfig::default(),
    )
}

/// Poll `check` until it holds or five seconds pass.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("{what} not reached within 5s");
}

fn hourly(id: &str) -> JobSpec {
    JobSpec::new(id, JobType::Cleanup, Duration::from_secs(3600))
}

// ============================================================================
// EXECUTION RECORDS
// ============================================================================

#[tokio::test]
async fn trigger_writes_a_completed_record() {
    let fx = Fixture::new();
    let scheduler = scheduler(&fx);
    let handler = CountingHandler::new();
    scheduler.register(hourly("cleanup"), handler.clone()).unwrap();

    let record = scheduler.trigger("cleanup").await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.job_type, JobType::Cleanup);
    assert!(record.started_at.is_some());
    assert!(record.finished_at.is_some());
    assert_eq!(handler.runs(), 1);

    assert_eq!(scheduler.last_execution("cleanup").unwrap(), Some(record));
    assert_eq!(fx.store.count_job_records(JobStatus::Completed).unwrap(), 1);
}

#[tokio::test]
async fn failing_handler_writes_a_failed_record() {
    let fx = Fixture::new();
    let scheduler = scheduler(&fx);
    scheduler
        .register(hourly("analytics"), CountingHandler::failing(1))
        .unwrap();

    let record = scheduler.trigger("analytics").await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.as_deref().unwrap().contains("exploded"));
    assert_eq!(fx.sink.events_of_kind("job.failed").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn loop_runs_on_its_interval() {
    let fx = Fixture::new();
    let scheduler = scheduler(&fx);
    let handler = CountingHandler::new();
    scheduler
        .register(
            JobSpec::new("publish", JobType::PublishDuePosts, Duration::from_secs(10)),
            handler.clone(),
        )
        .unwrap();

    assert_eq!(handler.runs(), 0);
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(handler.runs(), 3);

    scheduler.deregister("publish").unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(handler.runs(), 3);
}

// ============================================================================
// REGISTRATION
// ============================================================================

#[tokio::test]
async fn registration_rules() {
    let fx = Fixture::new();
    let scheduler = scheduler(&fx);
    scheduler.register(hourly("cleanup"), CountingHandler::new()).unwrap();

    let duplicate = scheduler.register(hourly("cleanup"), CountingHandler::new());
    assert!(duplicate.unwrap_err().is_conflict());

    let zero = scheduler.register(
        JobSpec::new("busy", JobType::Cleanup, Duration::ZERO),
        CountingHandler::new(),
    );
    assert!(matches!(zero, Err(PipelineError::Validation(_))));

    let jobs = scheduler.registered();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].spec.id, "cleanup");
    assert_eq!(jobs[0].in_flight, 0);
}

#[tokio::test]
async fn deregistered_jobs_cannot_be_triggered() {
    let fx = Fixture::new();
    let scheduler = scheduler(&fx);
    scheduler.register(hourly("cleanup"), CountingHandler::new()).unwrap();

    let (spec, _handler) = scheduler.deregister("cleanup").unwrap();
    assert_eq!(spec.id, "cleanup");
    assert!(matches!(
        scheduler.trigger("cleanup").await,
        Err(PipelineError::NotFound { .. })
    ));
    assert!(matches!(
        scheduler.deregister("cleanup"),
        Err(PipelineError::NotFound { .. })
    ));
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_running_critical_jobs() {
    let fx = Fixture::new();
    let scheduler = scheduler(&fx);
    let handler = CountingHandler::slow(Duration::from_secs(5));
    scheduler
        .register(hourly("publish").critical(), handler.clone())
        .unwrap();

    let running = Arc::clone(&scheduler);
    let run = tokio::spawn(async move { running.trigger("publish").await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(scheduler.registered()[0].in_flight, 1);

    let report = scheduler.shutdown(Duration::from_secs(30)).await;
    assert!(report.drained);
    assert!(report.still_running.is_empty());
    assert_eq!(run.await.unwrap().unwrap().status, JobStatus::Completed);

    let late = scheduler.register(hourly("late"), CountingHandler::new());
    assert!(late.unwrap_err().is_conflict());
}

#[tokio::test(start_paused = true)]
async fn shutdown_gives_up_after_the_drain_timeout() {
    let fx = Fixture::new();
    let scheduler = scheduler(&fx);
    scheduler
        .register(
            hourly("publish").critical(),
            CountingHandler::slow(Duration::from_secs(600)),
        )
        .unwrap();

    let running = Arc::clone(&scheduler);
    tokio::spawn(async move { running.trigger("publish").await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = scheduler.shutdown(Duration::from_secs(1)).await;
    assert!(!report.drained);
    assert_eq!(report.still_running, vec![("publish".to_string(), 1)]);
}

// ============================================================================
// HEALTH MONITOR
// ============================================================================

#[tokio::test]
async fn stalled_critical_job_is_restarted_once() {
    let fx = Fixture::new();
    let scheduler = scheduler(&fx);
    scheduler
        .register(
            JobSpec::new("publish", JobType::PublishDuePosts, Duration::from_secs(60)).critical(),
            CountingHandler::new(),
        )
        .unwrap();
    scheduler
        .register(
            JobSpec::new("analytics", JobType::Analytics, Duration::from_secs(60)),
            CountingHandler::new(),
        )
        .unwrap();
    let monitor = monitor(&fx, &scheduler);

    fx.advance(ChronoDuration::seconds(181));
    let report = monitor.check_once().await.unwrap();

    assert_eq!(report.restarted, vec!["publish".to_string()]);
    assert!(report.signals.contains(&HealthSignal::JobStalled {
        job_id: "publish".into(),
        idle_secs: 181,
    }));
    // Non-critical jobs only count as stalled past max_idle.
    assert!(report.signals.contains(&HealthSignal::JobOverdue {
        job_id: "analytics".into(),
        idle_secs: 181,
    }));
    assert!(!report.signals.contains(&HealthSignal::JobStalled {
        job_id: "analytics".into(),
        idle_secs: 181,
    }));
    assert_eq!(fx.sink.events_of_kind("job.stalled").len(), 1);

    let again = monitor.check_once().await.unwrap();
    assert!(again.restarted.is_empty());
    assert_eq!(scheduler.registered().len(), 2);
}

#[tokio::test]
async fn recent_activity_keeps_a_job_healthy() {
    let fx = Fixture::new();
    let scheduler = scheduler(&fx);
    scheduler
        .register(
            JobSpec::new("publish", JobType::PublishDuePosts, Duration::from_secs(60)).critical(),
            CountingHandler::new(),
        )
        .unwrap();
    let monitor = monitor(&fx, &scheduler);

    fx.advance(ChronoDuration::seconds(170));
    scheduler.trigger("publish").await.unwrap();
    fx.advance(ChronoDuration::seconds(100));

    let report = monitor.check_once().await.unwrap();
    assert!(report.is_healthy());
    assert!(report.restarted.is_empty());
}

#[tokio::test]
async fn failed_auto_retry_job_is_retriggered() {
    let fx = Fixture::new();
    let scheduler = scheduler(&fx);
    let handler = CountingHandler::failing(1);
    scheduler
        .register(
            JobSpec::new("retry", JobType::RetryFailedPosts, Duration::from_secs(3600))
                .critical()
                .auto_retry(),
            handler.clone(),
        )
        .unwrap();
    scheduler
        .register(hourly("cleanup"), CountingHandler::failing(1))
        .unwrap();
    let monitor = monitor(&fx, &scheduler);

    assert_eq!(
        scheduler.trigger("retry").await.unwrap().status,
        JobStatus::Failed
    );
    scheduler.trigger("cleanup").await.unwrap();

    let report = monitor.check_once().await.unwrap();
    assert_eq!(report.retried, vec!["retry".to_string()]);
    eventually("retry job re-ran", || {
        scheduler
            .last_execution("retry")
            .unwrap()
            .is_some_and(|r| r.status == JobStatus::Completed)
    })
    .await;
    assert_eq!(handler.runs(), 2);
    assert_eq!(
        scheduler.last_execution("cleanup").unwrap().unwrap().status,
        JobStatus::Failed
    );
}

#[tokio::test]
async fn slow_retrigger_does_not_hold_up_the_tick() {
    let fx = Fixture::new();
    let scheduler = scheduler(&fx);
    let handler = Arc::new(CountingHandler {
        fail_first: 1,
        delay: Some(Duration::from_millis(800)),
        ..CountingHandler::default()
    });
    scheduler
        .register(
            JobSpec::new("publish", JobType::PublishDuePosts, Duration::from_secs(300))
                .critical()
                .auto_retry(),
            handler.clone(),
        )
        .unwrap();
    let monitor = monitor(&fx, &scheduler);
    scheduler.trigger("publish").await.unwrap();

    let report = tokio::time::timeout(Duration::from_millis(300), monitor.check_once())
        .await
        .expect("check_once waited on the re-run")
        .unwrap();
    assert_eq!(report.retried, vec!["publish".to_string()]);

    let again = monitor.check_once().await.unwrap();
    assert!(again.retried.is_empty());

    eventually("publish job re-ran", || handler.runs() == 2).await;
}

#[tokio::test]
async fn backlogs_raise_signals() {
    let fx = Fixture::new();
    let scheduler = scheduler(&fx);
    scheduler
        .register(hourly("cleanup"), CountingHandler::failing(1))
        .unwrap();
    scheduler.trigger("cleanup").await.unwrap();

    let monitor = HealthMonitor::new(
        Arc::clone(&scheduler) as Arc<dyn Scheduler>,
        fx.dyn_store(),
        fx.activity.clone(),
        fx.shared_clock(),
        HealthConfig {
            critical_backlog: 100,
            failed_backlog: 0,
            ..HealthConfig::default()
        },
    )
    .with_backlog_probe(Arc::new(FixedBacklog(250)));

    let report = monitor.check_once().await.unwrap();
    assert!(report
        .signals
        .contains(&HealthSignal::CriticalBacklog { depth: 250 }));
    assert!(report
        .signals
        .contains(&HealthSignal::FailedJobBacklog { count: 1 }));
    assert!(!report.is_healthy());
}

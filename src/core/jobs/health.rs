//! Job liveness monitoring.
//!
//! Every tick the monitor measures how long each registered job has gone
//! without activity. Idle time counts from the later of the registration and
//! the last execution, so a restart resets the measurement and a stalled job
//! is restarted once per detection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::{RegisteredJob, Scheduler};
use crate::config::HealthConfig;
use crate::core::activity::ActivityRecorder;
use crate::core::executor::{Spawn, WorkerExecutor};
use crate::core::model::{JobStatus, RecurringJobRecord};
use crate::core::store::PipelineStore;
use crate::core::worker_pool::WorkerPool;
use crate::core::PipelineError;
use crate::util::SharedClock;

/// Reports how much work is waiting on the critical lane.
pub trait BacklogProbe: Send + Sync {
    /// Tasks queued on the critical lane.
    fn critical_depth(&self) -> u64;
}

impl<P, R, E> BacklogProbe for WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    fn critical_depth(&self) -> u64 {
        self.stats().critical_queued
    }
}

/// Something the monitor noticed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum HealthSignal {
    /// Idle for more than twice the interval.
    JobOverdue {
        /// Job concerned.
        job_id: String,
        /// Seconds without activity.
        idle_secs: i64,
    },
    /// Idle long enough to be restarted.
    JobStalled {
        /// Job concerned.
        job_id: String,
        /// Seconds without activity.
        idle_secs: i64,
    },
    /// Critical queue above its threshold.
    CriticalBacklog {
        /// Queued critical tasks.
        depth: u64,
    },
    /// Too many failed job records retained.
    FailedJobBacklog {
        /// Failed records.
        count: usize,
    },
}

/// Result of one monitor tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Signals raised.
    pub signals: Vec<HealthSignal>,
    /// Jobs restarted.
    pub restarted: Vec<String>,
    /// Jobs whose re-run was started after a failed execution.
    pub retried: Vec<String>,
}

impl HealthReport {
    /// No signal raised.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.signals.is_empty()
    }
}

/// Stops a running monitor loop when dropped or stopped.
#[derive(Debug)]
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
}

impl MonitorHandle {
    /// Stop the loop.
    pub fn stop(self) {
        let _ = self.stop.send(true);
    }
}

/// Watches registered jobs and queue depth.
pub struct HealthMonitor {
    scheduler: Arc<dyn Scheduler>,
    store: Arc<dyn PipelineStore>,
    activity: ActivityRecorder,
    clock: SharedClock,
    backlog: Option<Arc<dyn BacklogProbe>>,
    config: HealthConfig,
    /// Retriggers spawned but not yet finished.
    retriggering: Arc<Mutex<HashSet<String>>>,
}

impl HealthMonitor {
    /// Create a monitor.
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        store: Arc<dyn PipelineStore>,
        activity: ActivityRecorder,
        clock: SharedClock,
        config: HealthConfig,
    ) -> Self {
        Self {
            scheduler,
            store,
            activity,
            clock,
            backlog: None,
            config,
            retriggering: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Also watch the critical queue of `probe`.
    #[must_use]
    pub fn with_backlog_probe(mut self, probe: Arc<dyn BacklogProbe>) -> Self {
        self.backlog = Some(probe);
        self
    }

    fn idle_secs(&self, job: &RegisteredJob, last: Option<&RecurringJobRecord>) -> i64 {
        let last_activity = last
            .map(|r| r.finished_at.or(r.started_at).unwrap_or(r.queued_at))
            .map_or(job.registered_at, |at| at.max(job.registered_at));
        (self.clock.now() - last_activity).num_seconds().max(0)
    }

    fn is_stalled(&self, job: &RegisteredJob, idle_secs: i64) -> bool {
        let interval = i64::try_from(job.spec.interval.as_secs()).unwrap_or(i64::MAX);
        if job.spec.critical {
            idle_secs > interval.saturating_mul(3)
        } else {
            let max_idle = i64::try_from(self.config.max_idle_secs).unwrap_or(i64::MAX);
            idle_secs > max_idle && idle_secs > interval.saturating_mul(2)
        }
    }

    fn restart(&self, job: &RegisteredJob, idle_secs: i64) -> Result<(), PipelineError> {
        let id = &job.spec.id;
        let stalled = PipelineError::StalledJob {
            job_id: id.clone(),
            idle_secs,
        };
        tracing::warn!(job_id = %id, idle_secs = idle_secs, "restarting stalled job");
        let (spec, handler) = self.scheduler.deregister(id)?;
        self.scheduler.register(spec, handler)?;
        self.activity.record(
            id,
            "job.stalled",
            stalled.to_string(),
            serde_json::json!({ "idle_secs": idle_secs, "critical": job.spec.critical }),
        );
        Ok(())
    }

    /// Run a failed job again in the background so a slow run does not hold
    /// up the tick. Returns `false` if a retrigger is already pending.
    fn spawn_retrigger(&self, id: &str) -> bool {
        if !self.retriggering.lock().insert(id.to_string()) {
            return false;
        }
        tracing::info!(job_id = %id, "retriggering failed job");
        let scheduler = Arc::clone(&self.scheduler);
        let pending = Arc::clone(&self.retriggering);
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = scheduler.trigger(&id).await {
                tracing::error!(job_id = %id, error = %e, "job retrigger failed");
            }
            pending.lock().remove(&id);
        });
        true
    }

    /// Run one check.
    ///
    /// # Errors
    ///
    /// Store failures. A job that fails to restart is logged and skipped.
    pub async fn check_once(&self) -> Result<HealthReport, PipelineError> {
        let mut report = HealthReport::default();

        for job in self.scheduler.registered() {
            let id = job.spec.id.clone();
            let last = self.scheduler.last_execution(&id)?;
            let idle_secs = self.idle_secs(&job, last.as_ref());
            let interval = i64::try_from(job.spec.interval.as_secs()).unwrap_or(i64::MAX);

            if idle_secs > interval.saturating_mul(2) {
                tracing::warn!(job_id = %id, idle_secs = idle_secs, "job overdue");
                report.signals.push(HealthSignal::JobOverdue {
                    job_id: id.clone(),
                    idle_secs,
                });
            }

            if self.is_stalled(&job, idle_secs) {
                report.signals.push(HealthSignal::JobStalled {
                    job_id: id.clone(),
                    idle_secs,
                });
                match self.restart(&job, idle_secs) {
                    Ok(()) => report.restarted.push(id),
                    Err(e) => tracing::error!(job_id = %id, error = %e, "job restart failed"),
                }
                continue;
            }

            let failed_last = last.as_ref().is_some_and(|r| r.status == JobStatus::Failed);
            if failed_last
                && job.spec.auto_retry
                && job.in_flight == 0
                && self.spawn_retrigger(&id)
            {
                report.retried.push(id);
            }
        }

        if let Some(probe) = &self.backlog {
            let depth = probe.critical_depth();
            if depth > self.config.critical_backlog {
                tracing::warn!(depth = depth, "critical queue backlog");
                report.signals.push(HealthSignal::CriticalBacklog { depth });
            }
        }

        let failed = self.store.count_job_records(JobStatus::Failed)?;
        if failed > self.config.failed_backlog {
            tracing::warn!(count = failed, "failed job records accumulating");
            report
                .signals
                .push(HealthSignal::FailedJobBacklog { count: failed });
        }

        Ok(report)
    }

    /// Run [`Self::check_once`] every `config.tick_secs` until the handle stops.
    pub fn start<S: Spawn>(self: Arc<Self>, spawner: &S) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = Duration::from_secs(self.config.tick_secs.max(1));
        spawner.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.check_once().await {
                            tracing::error!(error = %e, "health check failed");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("health monitor stopped");
        });
        MonitorHandle { stop: stop_tx }
    }
}

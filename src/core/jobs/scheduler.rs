//! Interval-driven job scheduler.
//!
//! Each registered job gets its own loop spawned through [`Spawn`]. A loop
//! ticks on the job's interval and stops when its watch channel fires or its
//! registration is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::{JobHandler, JobSpec, RegisteredJob, Scheduler};
use crate::core::activity::ActivityRecorder;
use crate::core::executor::Spawn;
use crate::core::model::{JobStatus, RecurringJobRecord};
use crate::core::store::PipelineStore;
use crate::core::PipelineError;
use crate::util::SharedClock;

struct JobEntry {
    spec: JobSpec,
    handler: Arc<dyn JobHandler>,
    registered_at: DateTime<Utc>,
    stop: watch::Sender<bool>,
    in_flight: Arc<AtomicUsize>,
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Inner {
    store: Arc<dyn PipelineStore>,
    activity: ActivityRecorder,
    clock: SharedClock,
    jobs: RwLock<HashMap<String, JobEntry>>,
    stopped: AtomicBool,
}

impl Inner {
    async fn execute(&self, id: &str) -> Result<RecurringJobRecord, PipelineError> {
        let (spec, handler, in_flight) = {
            let jobs = self.jobs.read();
            let entry = jobs
                .get(id)
                .ok_or_else(|| PipelineError::not_found("job", id))?;
            (
                entry.spec.clone(),
                Arc::clone(&entry.handler),
                Arc::clone(&entry.in_flight),
            )
        };
        let _running = InFlight::enter(in_flight);

        let queued = RecurringJobRecord::queued(&spec.id, spec.job_type, self.clock.now());
        self.store.insert_job_record(queued.clone())?;
        let started = queued.start(self.clock.now())?;
        self.store.update_job_record(&started, JobStatus::Queued)?;

        let outcome = handler.run().await;
        let finished = match &outcome {
            Ok(report) => {
                tracing::debug!(
                    job_id = %spec.id,
                    processed = report.processed,
                    failed = report.failed,
                    "job completed"
                );
                started.complete(self.clock.now())?
            }
            Err(e) => {
                tracing::warn!(job_id = %spec.id, error = %e, "job failed");
                started.fail(&e.to_string(), self.clock.now())?
            }
        };
        self.store.update_job_record(&finished, JobStatus::Processing)?;
        if finished.status == JobStatus::Failed {
            self.activity.record(
                &spec.id,
                "job.failed",
                finished.error.clone().unwrap_or_default(),
                serde_json::json!({ "record_id": finished.id, "job_type": spec.job_type }),
            );
        }
        Ok(finished)
    }
}

/// Outcome of [`JobScheduler::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether every critical job finished within the drain timeout.
    pub drained: bool,
    /// Critical jobs still running when the timeout expired, with their counts.
    pub still_running: Vec<(String, usize)>,
}

/// Scheduler running job loops on a [`Spawn`] runtime.
pub struct JobScheduler<S> {
    inner: Arc<Inner>,
    spawner: S,
}

impl<S> JobScheduler<S>
where
    S: Spawn + Send + Sync + 'static,
{
    /// Create a scheduler.
    pub fn new(
        store: Arc<dyn PipelineStore>,
        activity: ActivityRecorder,
        clock: SharedClock,
        spawner: S,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                activity,
                clock,
                jobs: RwLock::new(HashMap::new()),
                stopped: AtomicBool::new(false),
            }),
            spawner,
        }
    }

    /// Runtime the job loops run on.
    #[must_use]
    pub const fn spawner(&self) -> &S {
        &self.spawner
    }

    fn spawn_loop(&self, id: String, interval: Duration, mut stop: watch::Receiver<bool>) {
        let inner = Arc::clone(&self.inner);
        self.spawner.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => match inner.execute(&id).await {
                        Ok(_) => {}
                        Err(PipelineError::NotFound { .. }) => break,
                        Err(e) => tracing::error!(job_id = %id, error = %e, "job execution not recorded"),
                    },
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(job_id = %id, "job loop stopped");
        });
    }

    /// Stop every loop, then wait for running critical jobs up to `drain_timeout`.
    pub async fn shutdown(&self, drain_timeout: Duration) -> ShutdownReport {
        self.inner.stopped.store(true, Ordering::Release);
        let critical: Vec<(String, Arc<AtomicUsize>)> = {
            let jobs = self.inner.jobs.read();
            jobs.values()
                .filter_map(|entry| {
                    let _ = entry.stop.send(true);
                    entry
                        .spec
                        .critical
                        .then(|| (entry.spec.id.clone(), Arc::clone(&entry.in_flight)))
                })
                .collect()
        };

        let deadline = tokio::time::Instant::now() + drain_timeout;
        loop {
            let still_running: Vec<(String, usize)> = critical
                .iter()
                .map(|(id, count)| (id.clone(), count.load(Ordering::Acquire)))
                .filter(|(_, n)| *n > 0)
                .collect();
            if still_running.is_empty() {
                tracing::info!("job scheduler stopped");
                return ShutdownReport {
                    drained: true,
                    still_running,
                };
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::warn!(?still_running, "drain timeout expired; proceeding with shutdown");
                return ShutdownReport {
                    drained: false,
                    still_running,
                };
            }
            tokio::time::sleep((deadline - now).min(Duration::from_millis(100))).await;
        }
    }
}

#[async_trait]
impl<S> Scheduler for JobScheduler<S>
where
    S: Spawn + Send + Sync + 'static,
{
    fn register(&self, spec: JobSpec, handler: Arc<dyn JobHandler>) -> Result<(), PipelineError> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(PipelineError::conflict("scheduler is shut down"));
        }
        if spec.interval.is_zero() {
            return Err(PipelineError::validation(format!(
                "job `{}` needs a non-zero interval",
                spec.id
            )));
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        {
            let mut jobs = self.inner.jobs.write();
            if jobs.contains_key(&spec.id) {
                return Err(PipelineError::conflict(format!(
                    "job `{}` is already registered",
                    spec.id
                )));
            }
            jobs.insert(
                spec.id.clone(),
                JobEntry {
                    spec: spec.clone(),
                    handler,
                    registered_at: self.inner.clock.now(),
                    stop: stop_tx,
                    in_flight: Arc::new(AtomicUsize::new(0)),
                },
            );
        }
        self.spawn_loop(spec.id.clone(), spec.interval, stop_rx);
        tracing::info!(
            job_id = %spec.id,
            interval_secs = spec.interval.as_secs(),
            critical = spec.critical,
            "job registered"
        );
        Ok(())
    }

    async fn trigger(&self, id: &str) -> Result<RecurringJobRecord, PipelineError> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(PipelineError::conflict("scheduler is shut down"));
        }
        self.inner.execute(id).await
    }

    fn deregister(&self, id: &str) -> Result<(JobSpec, Arc<dyn JobHandler>), PipelineError> {
        let entry = self
            .inner
            .jobs
            .write()
            .remove(id)
            .ok_or_else(|| PipelineError::not_found("job", id))?;
        let _ = entry.stop.send(true);
        tracing::info!(job_id = %id, "job deregistered");
        Ok((entry.spec, entry.handler))
    }

    fn last_execution(&self, id: &str) -> Result<Option<RecurringJobRecord>, PipelineError> {
        self.inner.store.latest_job_record(id)
    }

    fn registered(&self) -> Vec<RegisteredJob> {
        let mut jobs: Vec<_> = self
            .inner
            .jobs
            .read()
            .values()
            .map(|entry| RegisteredJob {
                spec: entry.spec.clone(),
                registered_at: entry.registered_at,
                in_flight: entry.in_flight.load(Ordering::Acquire),
            })
            .collect();
        jobs.sort_by(|a, b| a.spec.id.cmp(&b.spec.id));
        jobs
    }
}

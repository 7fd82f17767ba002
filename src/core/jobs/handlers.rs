//! The canonical recurring jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use super::{JobHandler, JobReport, JobSpec};
use crate::config::JobsConfig;
use crate::core::dispatcher::DispatchOutcome;
use crate::core::engine::ScheduledPostEngine;
use crate::core::executor::{PipelineTask, TaskOutcome};
use crate::core::model::{JobType, PostStatus, ProjectMetrics, ScheduledPostStatus};
use crate::core::store::PipelineStore;
use crate::core::worker_pool::PoolError;
use crate::core::{PipelineError, PipelinePool};
use crate::util::{QueueLane, SharedClock};

/// Dispatches scheduled posts whose time has come.
pub const PUBLISH_DUE_POSTS: &str = "publish-due-posts";
/// Re-dispatches failed posts whose backoff has elapsed.
pub const RETRY_FAILED_POSTS: &str = "retry-failed-posts";
/// Prunes old job records.
pub const CLEANUP: &str = "cleanup";
/// Recomputes project aggregates.
pub const ANALYTICS: &str = "analytics";
/// Recovers claims abandoned by crashed workers.
pub const HEALTH_CHECK: &str = "health-check";

/// Specs for the five canonical jobs.
///
/// Both publishing jobs are critical and retried automatically after a
/// failed run.
#[must_use]
pub fn canonical_jobs(config: &JobsConfig) -> Vec<JobSpec> {
    let secs = Duration::from_secs;
    vec![
        JobSpec::new(
            PUBLISH_DUE_POSTS,
            JobType::PublishDuePosts,
            secs(config.publish_due_posts_secs),
        )
        .critical()
        .auto_retry(),
        JobSpec::new(
            RETRY_FAILED_POSTS,
            JobType::RetryFailedPosts,
            secs(config.retry_failed_posts_secs),
        )
        .critical()
        .auto_retry(),
        JobSpec::new(CLEANUP, JobType::Cleanup, secs(config.cleanup_secs)),
        JobSpec::new(ANALYTICS, JobType::Analytics, secs(config.analytics_secs)),
        JobSpec::new(
            HEALTH_CHECK,
            JobType::HealthCheck,
            secs(config.health_check_secs),
        ),
    ]
}

/// Submit each record to the critical lane and wait for every outcome.
///
/// A full queue is not fatal: the record stays due and the next run picks it up.
async fn dispatch_batch(
    pool: &PipelinePool,
    ids: Vec<String>,
    timeout: Duration,
) -> Result<JobReport, PipelineError> {
    let mut report = JobReport::default();
    let mut submitted = Vec::with_capacity(ids.len());
    for id in ids {
        let task = PipelineTask::PublishScheduled {
            scheduled_post_id: id.clone(),
        };
        match pool.submit(QueueLane::Critical, task.label(), task) {
            Ok(key) => submitted.push((id, key)),
            Err(PoolError::QueueFull(_)) => {
                tracing::warn!(scheduled_post_id = %id, "critical queue full; deferring to next run");
                report.failed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let waits = submitted.into_iter().map(|(id, key)| async move {
        let result = pool.retrieve_async(key, timeout).await;
        (id, result)
    });
    for (id, result) in join_all(waits).await {
        match result {
            Ok(TaskOutcome::Dispatched(DispatchOutcome::Published { .. })) => report.processed += 1,
            Ok(TaskOutcome::Dispatched(DispatchOutcome::Skipped { reason, .. })) => {
                tracing::debug!(scheduled_post_id = %id, reason = %reason, "dispatch skipped");
            }
            Ok(TaskOutcome::Dispatched(DispatchOutcome::Failed { message, .. })) => {
                tracing::debug!(scheduled_post_id = %id, error = %message, "dispatch failed");
                report.failed += 1;
            }
            Ok(TaskOutcome::Error(e)) => {
                tracing::warn!(scheduled_post_id = %id, error = %e, "dispatch errored");
                report.failed += 1;
            }
            Ok(other) => {
                tracing::error!(scheduled_post_id = %id, outcome = ?other, "unexpected task outcome");
                report.failed += 1;
            }
            Err(e) => {
                tracing::warn!(scheduled_post_id = %id, error = %e, "no dispatch result");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Runs [`PUBLISH_DUE_POSTS`].
pub struct PublishDuePostsHandler {
    engine: ScheduledPostEngine,
    pool: Arc<PipelinePool>,
    result_timeout: Duration,
}

impl PublishDuePostsHandler {
    /// Create the handler.
    pub const fn new(
        engine: ScheduledPostEngine,
        pool: Arc<PipelinePool>,
        result_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            pool,
            result_timeout,
        }
    }
}

#[async_trait]
impl JobHandler for PublishDuePostsHandler {
    async fn run(&self) -> Result<JobReport, PipelineError> {
        let due = self
            .engine
            .due_for_publishing(self.engine.config().batch_limit)?;
        if due.is_empty() {
            return Ok(JobReport::default());
        }
        tracing::info!(count = due.len(), "publishing due posts");
        let ids = due.into_iter().map(|r| r.id).collect();
        dispatch_batch(&self.pool, ids, self.result_timeout).await
    }
}

/// Runs [`RETRY_FAILED_POSTS`].
pub struct RetryFailedPostsHandler {
    engine: ScheduledPostEngine,
    pool: Arc<PipelinePool>,
    result_timeout: Duration,
}

impl RetryFailedPostsHandler {
    /// Create the handler.
    pub const fn new(
        engine: ScheduledPostEngine,
        pool: Arc<PipelinePool>,
        result_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            pool,
            result_timeout,
        }
    }
}

#[async_trait]
impl JobHandler for RetryFailedPostsHandler {
    async fn run(&self) -> Result<JobReport, PipelineError> {
        let due = self.engine.due_for_retry(self.engine.config().batch_limit)?;
        let mut ids = Vec::with_capacity(due.len());
        for record in due {
            match self.engine.reset_for_retry(&record.id) {
                Ok(reset) => ids.push(reset.id),
                // Reset or cancelled concurrently.
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        if ids.is_empty() {
            return Ok(JobReport::default());
        }
        tracing::info!(count = ids.len(), "retrying failed posts");
        dispatch_batch(&self.pool, ids, self.result_timeout).await
    }
}

/// Runs [`CLEANUP`].
pub struct CleanupHandler {
    store: Arc<dyn PipelineStore>,
    clock: SharedClock,
    retention: Duration,
}

impl CleanupHandler {
    /// Create the handler. Finished job records older than `retention` are pruned.
    pub fn new(store: Arc<dyn PipelineStore>, clock: SharedClock, retention: Duration) -> Self {
        Self {
            store,
            clock,
            retention,
        }
    }
}

#[async_trait]
impl JobHandler for CleanupHandler {
    async fn run(&self) -> Result<JobReport, PipelineError> {
        let retention = chrono::Duration::from_std(self.retention)
            .map_err(|e| PipelineError::validation(format!("retention out of range: {e}")))?;
        let pruned = self.store.prune_job_records(self.clock.now() - retention)?;
        if pruned > 0 {
            tracing::info!(pruned = pruned, "pruned job records");
        }
        Ok(JobReport {
            processed: pruned,
            failed: 0,
        })
    }
}

/// Runs [`ANALYTICS`].
pub struct AnalyticsHandler {
    store: Arc<dyn PipelineStore>,
    clock: SharedClock,
}

impl AnalyticsHandler {
    /// Create the handler.
    pub fn new(store: Arc<dyn PipelineStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    fn metrics_for(&self, project_id: &str, transcripts: u32) -> Result<ProjectMetrics, PipelineError> {
        let count = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        let posts = self.store.posts_for_project(project_id)?;
        let scheduled = self
            .store
            .scheduled_for_project(project_id)?
            .into_iter()
            .filter(|r| r.status == ScheduledPostStatus::Pending)
            .count();
        Ok(ProjectMetrics {
            transcripts,
            insights: count(self.store.insights_for_project(project_id)?.len()),
            posts: count(posts.len()),
            scheduled: count(scheduled),
            published: count(posts.iter().filter(|p| p.status == PostStatus::Published).count()),
            failed: count(posts.iter().filter(|p| p.status == PostStatus::Failed).count()),
        })
    }
}

#[async_trait]
impl JobHandler for AnalyticsHandler {
    async fn run(&self) -> Result<JobReport, PipelineError> {
        let mut report = JobReport::default();
        for project in self.store.list_projects()? {
            let metrics = self.metrics_for(&project.id, project.metrics.transcripts)?;
            if metrics == project.metrics {
                continue;
            }
            let next = project.with_metrics(metrics, self.clock.now());
            match self.store.update_project(&next, project.stage) {
                Ok(()) => report.processed += 1,
                // Stage moved underneath us; the next run catches up.
                Err(e) if e.is_conflict() => report.failed += 1,
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }
}

/// Runs [`HEALTH_CHECK`].
pub struct HealthCheckHandler {
    engine: ScheduledPostEngine,
}

impl HealthCheckHandler {
    /// Create the handler.
    pub const fn new(engine: ScheduledPostEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for HealthCheckHandler {
    async fn run(&self) -> Result<JobReport, PipelineError> {
        let stale_after = Duration::from_secs(self.engine.config().stale_claim_secs);
        let recovered = self.engine.recover_stale_claims(stale_after)?;
        Ok(JobReport {
            processed: recovered,
            failed: 0,
        })
    }
}

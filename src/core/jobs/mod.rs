//! Recurring background jobs.
//!
//! A job is a [`JobSpec`] (id, cadence, criticality) bound to a
//! [`JobHandler`]. The [`Scheduler`] runs each job on its interval and on
//! demand, writing one [`RecurringJobRecord`] per execution. The
//! [`health::HealthMonitor`] watches those records and restarts or retriggers
//! jobs that stop making progress.

pub mod handlers;
pub mod health;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{JobType, RecurringJobRecord};
use super::PipelineError;

pub use handlers::{
    canonical_jobs, AnalyticsHandler, CleanupHandler, HealthCheckHandler, PublishDuePostsHandler,
    RetryFailedPostsHandler, ANALYTICS, CLEANUP, HEALTH_CHECK, PUBLISH_DUE_POSTS,
    RETRY_FAILED_POSTS,
};
pub use health::{BacklogProbe, HealthMonitor, HealthReport, HealthSignal, MonitorHandle};
pub use scheduler::{JobScheduler, ShutdownReport};

/// Static description of a recurring job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Unique job identifier.
    pub id: String,
    /// Kind of work.
    pub job_type: JobType,
    /// Cadence.
    pub interval: Duration,
    /// Critical jobs are restarted sooner and drained on shutdown.
    pub critical: bool,
    /// Retrigger immediately after a failed execution.
    pub auto_retry: bool,
}

impl JobSpec {
    /// Non-critical job without auto-retry.
    pub fn new(id: impl Into<String>, job_type: JobType, interval: Duration) -> Self {
        Self {
            id: id.into(),
            job_type,
            interval,
            critical: false,
            auto_retry: false,
        }
    }

    /// Mark the job critical.
    #[must_use]
    pub const fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Enable auto-retry after failures.
    #[must_use]
    pub const fn auto_retry(mut self) -> Self {
        self.auto_retry = true;
        self
    }
}

/// Summary of one successful execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// Items handled.
    pub processed: usize,
    /// Items that failed without failing the job.
    pub failed: usize,
}

/// Work performed by a job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run once.
    async fn run(&self) -> Result<JobReport, PipelineError>;
}

/// A job as currently registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredJob {
    /// Spec the job was registered with.
    pub spec: JobSpec,
    /// Registration time; staleness is measured from here until the first run.
    pub registered_at: DateTime<Utc>,
    /// Executions currently running.
    pub in_flight: usize,
}

/// Job orchestration interface.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Register a job and start its loop.
    ///
    /// # Errors
    ///
    /// `StateConflict` if the id is taken or the scheduler is shut down;
    /// `Validation` for a zero interval.
    fn register(&self, spec: JobSpec, handler: Arc<dyn JobHandler>) -> Result<(), PipelineError>;

    /// Run a job now, outside its cadence.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, store failures. A failing handler is not
    /// an error: the returned record is `Failed`.
    async fn trigger(&self, id: &str) -> Result<RecurringJobRecord, PipelineError>;

    /// Stop a job's loop and remove it, returning what it was registered with.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    fn deregister(&self, id: &str) -> Result<(JobSpec, Arc<dyn JobHandler>), PipelineError>;

    /// Latest execution record of a job.
    ///
    /// # Errors
    ///
    /// Store failures.
    fn last_execution(&self, id: &str) -> Result<Option<RecurringJobRecord>, PipelineError>;

    /// Currently registered jobs.
    fn registered(&self) -> Vec<RegisteredJob>;
}

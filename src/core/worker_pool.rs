//! Worker pool with dedicated OS threads and two named queues.
//!
//! Publish operations go to the `critical` queue, everything else to
//! `default`. Workers always drain `critical` first. Each worker thread runs
//! its own current-thread tokio runtime, so a slow platform call never stalls
//! the scheduler's runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! use content_pipeline::core::WorkerPool;
//! use content_pipeline::config::WorkerPoolConfig;
//! use content_pipeline::util::QueueLane;
//!
//! let pool = WorkerPool::new(
//!     WorkerPoolConfig::new().with_worker_count(4),
//!     executor,
//! )?;
//! let key = pool.submit(QueueLane::Critical, "publish", task)?;
//! let outcome = pool.retrieve_async(key, Duration::from_secs(60)).await?;
//! ```

mod native;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{PipelineError, TaskMetadata};
use crate::util::QueueLane;

pub use native::WorkerPool;

/// Errors that can occur when using a `WorkerPool`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The lane's queue is full.
    #[error("{0} queue is full")]
    QueueFull(QueueLane),
    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,
    /// No result slot exists for the key.
    #[error("result not found")]
    ResultNotFound,
    /// The pool has been shut down.
    #[error("pool has been shut down")]
    PoolShutdown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<PoolError> for PipelineError {
    fn from(err: PoolError) -> Self {
        Self::Backend(format!("worker pool: {err}"))
    }
}

/// Handle for retrieving a submitted task's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey(pub u64);

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Tasks waiting in the critical queue.
    pub critical_queued: u64,
    /// Critical tasks executing.
    pub critical_active: u64,
    /// Tasks waiting in the default queue.
    pub default_queued: u64,
    /// Default tasks executing.
    pub default_active: u64,
    /// Total tasks completed.
    pub completed_tasks: u64,
    /// Total tasks submitted.
    pub submitted_tasks: u64,
}

impl PoolStats {
    /// Queued plus executing tasks on `lane`.
    #[must_use]
    pub const fn in_flight(&self, lane: QueueLane) -> u64 {
        match lane {
            QueueLane::Critical => self.critical_queued + self.critical_active,
            QueueLane::Default => self.default_queued + self.default_active,
        }
    }
}

#[derive(Debug, Default)]
struct LaneCounters {
    queued: AtomicU64,
    active: AtomicU64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    critical: LaneCounters,
    default: LaneCounters,
    pub completed_tasks: AtomicU64,
    pub submitted_tasks: AtomicU64,
}

impl PoolCounters {
    fn lane(&self, lane: QueueLane) -> &LaneCounters {
        match lane {
            QueueLane::Critical => &self.critical,
            QueueLane::Default => &self.default,
        }
    }

    pub(crate) fn enqueued(&self, lane: QueueLane) {
        self.submitted_tasks.fetch_add(1, Ordering::Relaxed);
        self.lane(lane).queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo `enqueued` for a task the channel refused.
    pub(crate) fn rejected(&self, lane: QueueLane) {
        self.submitted_tasks.fetch_sub(1, Ordering::Relaxed);
        self.lane(lane).queued.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn started(&self, lane: QueueLane) {
        let counters = self.lane(lane);
        counters.queued.fetch_sub(1, Ordering::Relaxed);
        counters.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn finished(&self, lane: QueueLane) {
        self.lane(lane).active.fetch_sub(1, Ordering::Relaxed);
        self.completed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics.
    pub(crate) fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            critical_queued: self.critical.queued.load(Ordering::Relaxed),
            critical_active: self.critical.active.load(Ordering::Relaxed),
            default_queued: self.default.queued.load(Ordering::Relaxed),
            default_active: self.default.active.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
        }
    }
}

/// A task submitted to the worker pool.
#[derive(Debug)]
pub(crate) struct WorkerTask<P> {
    pub payload: P,
    pub meta: TaskMetadata,
    /// Whether a caller will retrieve the result.
    pub wants_result: bool,
}

//! Task execution on worker threads.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::activity::ActivityRecorder;
use super::approval::advance_project;
use super::dispatcher::{DispatchOutcome, PublishingDispatcher};
use super::model::ProjectAction;
use super::store::PipelineStore;
use super::worker_pool::TaskKey;
use super::PipelineError;
use crate::util::{Platform, QueueLane, SharedClock};

/// Abstraction for spawning background loops on a runtime.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Metadata the pool attaches to every task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Pool-assigned key.
    pub id: TaskKey,
    /// Queue the task came from.
    pub lane: QueueLane,
    /// Short description for logs.
    pub label: String,
}

/// Executor run by pool workers.
///
/// On native platforms `execute` is called from a dedicated worker thread
/// with its own current-thread tokio runtime. Results need not be
/// serializable.
#[async_trait]
pub trait WorkerExecutor<P, R>: Send + Sync + Clone + 'static
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Execute a task payload and return the result.
    async fn execute(&self, payload: P, meta: TaskMetadata) -> R;
}

/// Work the pipeline hands to the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineTask {
    /// Claim and dispatch one scheduled post.
    PublishScheduled {
        /// Record to dispatch.
        scheduled_post_id: String,
    },
    /// Publish one post to several platforms now.
    PublishPost {
        /// Post to publish.
        post_id: String,
        /// Target platforms.
        platforms: Vec<Platform>,
    },
    /// Apply an on-demand content-stage transition.
    AdvanceProject {
        /// Project to move.
        project_id: String,
        /// Stage action.
        action: ProjectAction,
    },
}

impl PipelineTask {
    /// Queue the task belongs on.
    #[must_use]
    pub const fn lane(&self) -> QueueLane {
        match self {
            Self::PublishScheduled { .. } | Self::PublishPost { .. } => QueueLane::Critical,
            Self::AdvanceProject { .. } => QueueLane::Default,
        }
    }

    /// Label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::PublishScheduled { .. } => "publish-scheduled",
            Self::PublishPost { .. } => "publish-post",
            Self::AdvanceProject { .. } => "advance-project",
        }
    }
}

/// Result of a [`PipelineTask`].
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// One scheduled post dispatched.
    Dispatched(DispatchOutcome),
    /// Per-platform results of a post fan-out.
    FannedOut(BTreeMap<Platform, DispatchOutcome>),
    /// Whether the stage action applied.
    Advanced(bool),
    /// The task could not run.
    Error(PipelineError),
}

/// Executes [`PipelineTask`]s.
#[derive(Clone)]
pub struct PipelineExecutor {
    dispatcher: PublishingDispatcher,
    store: Arc<dyn PipelineStore>,
    activity: ActivityRecorder,
    clock: SharedClock,
}

impl PipelineExecutor {
    /// Create an executor.
    pub fn new(
        dispatcher: PublishingDispatcher,
        store: Arc<dyn PipelineStore>,
        activity: ActivityRecorder,
        clock: SharedClock,
    ) -> Self {
        Self {
            dispatcher,
            store,
            activity,
            clock,
        }
    }
}

#[async_trait]
impl WorkerExecutor<PipelineTask, TaskOutcome> for PipelineExecutor {
    async fn execute(&self, payload: PipelineTask, meta: TaskMetadata) -> TaskOutcome {
        let outcome = match payload {
            PipelineTask::PublishScheduled { scheduled_post_id } => self
                .dispatcher
                .dispatch_scheduled(&scheduled_post_id)
                .await
                .map_or_else(TaskOutcome::Error, TaskOutcome::Dispatched),
            PipelineTask::PublishPost { post_id, platforms } => {
                TaskOutcome::FannedOut(self.dispatcher.dispatch_post(&post_id, &platforms).await)
            }
            PipelineTask::AdvanceProject { project_id, action } => advance_project(
                self.store.as_ref(),
                &self.activity,
                &self.clock,
                &project_id,
                action,
            )
            .map_or_else(TaskOutcome::Error, TaskOutcome::Advanced),
        };
        if let TaskOutcome::Error(e) = &outcome {
            tracing::error!(task = %meta.id, label = %meta.label, error = %e, "task failed");
        }
        outcome
    }
}

//! Operations exposed to upstream API and CLI layers.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::approval::ApprovalWorkflow;
use crate::core::batch::BatchFailure;
use crate::core::dispatcher::PublishingDispatcher;
use crate::core::engine::ScheduledPostEngine;
use crate::core::executor::PipelineTask;
use crate::core::model::{
    InsightStatus, Post, PostStatus, ProjectAction, ProjectStage, ScheduledPost,
    ScheduledPostStatus,
};
use crate::core::store::PipelineStore;
use crate::core::worker_pool::PoolError;
use crate::core::{PipelineError, PipelinePool};
use crate::util::Platform;

/// One entry of a schedule request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleItem {
    /// Post to deliver.
    pub post_id: String,
    /// Target platform; the post's own platform when absent.
    #[serde(default)]
    pub platform: Option<Platform>,
    /// Due time.
    pub scheduled_time: DateTime<Utc>,
    /// IANA timezone the user picked the time in.
    pub timezone: String,
}

/// Result of [`PipelineService::schedule_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleBatchResponse {
    /// Records created.
    pub scheduled_count: usize,
    /// Identifiers of the created records.
    pub scheduled_post_ids: Vec<String>,
    /// Items that were not scheduled.
    pub failures: Vec<BatchFailure>,
}

/// Result of [`PipelineService::publish_now`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishNowResponse {
    /// Posts handed to the worker pool.
    pub queued_count: usize,
    /// Worker pool task of each queued post.
    pub job_ids: Vec<String>,
    /// Posts that were not queued.
    pub failures: Vec<BatchFailure>,
}

/// Entity counts of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineCounts {
    /// Insights extracted.
    pub insights: usize,
    /// Insights approved.
    pub insights_approved: usize,
    /// Posts generated.
    pub posts: usize,
    /// Posts approved and not yet scheduled.
    pub posts_approved: usize,
    /// Posts with an active schedule.
    pub posts_scheduled: usize,
    /// Posts delivered.
    pub posts_published: usize,
    /// Posts that failed for good.
    pub posts_failed: usize,
    /// Scheduled-post records waiting for their time.
    pub pending_deliveries: usize,
    /// Scheduled-post records failed.
    pub failed_deliveries: usize,
}

/// Result of [`PipelineService::get_pipeline_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Project.
    pub project_id: String,
    /// Current stage.
    pub stage: ProjectStage,
    /// Position of the stage in the pipeline.
    pub progress_percent: u8,
    /// Stage actions legal now.
    pub allowed_transitions: Vec<ProjectAction>,
    /// Entity counts.
    pub counts: PipelineCounts,
}

fn failure(id: &str, err: &PipelineError) -> BatchFailure {
    BatchFailure {
        id: id.to_string(),
        error: err.to_string(),
        conflict: err.is_conflict(),
    }
}

fn ensure_in_project(post: &Post, project_id: &str) -> Result<(), PipelineError> {
    if post.project_id == project_id {
        Ok(())
    } else {
        Err(PipelineError::validation(format!(
            "post {} does not belong to project {project_id}",
            post.id
        )))
    }
}

/// Facade over the pipeline components.
#[derive(Clone)]
pub struct PipelineService {
    store: Arc<dyn PipelineStore>,
    approval: ApprovalWorkflow,
    engine: ScheduledPostEngine,
    dispatcher: PublishingDispatcher,
    pool: Arc<PipelinePool>,
}

impl PipelineService {
    /// Create the facade.
    pub fn new(
        store: Arc<dyn PipelineStore>,
        approval: ApprovalWorkflow,
        dispatcher: PublishingDispatcher,
        pool: Arc<PipelinePool>,
    ) -> Self {
        Self {
            store,
            approval,
            engine: dispatcher.engine().clone(),
            dispatcher,
            pool,
        }
    }

    /// Review operations.
    #[must_use]
    pub const fn approval(&self) -> &ApprovalWorkflow {
        &self.approval
    }

    /// Scheduled-post engine.
    #[must_use]
    pub const fn engine(&self) -> &ScheduledPostEngine {
        &self.engine
    }

    /// Schedule several posts of a project.
    ///
    /// Items are scheduled independently; a rejected item is reported in
    /// `failures` and does not stop the others.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty request or one naming the same post and
    /// platform twice; `NotFound` for an unknown project.
    pub fn schedule_batch(
        &self,
        project_id: &str,
        items: &[ScheduleItem],
    ) -> Result<ScheduleBatchResponse, PipelineError> {
        if items.is_empty() {
            return Err(PipelineError::validation("no posts to schedule"));
        }
        let mut seen = HashSet::new();
        for item in items {
            if !seen.insert((item.post_id.as_str(), item.platform)) {
                return Err(PipelineError::validation(format!(
                    "post {} listed twice for the same platform",
                    item.post_id
                )));
            }
        }
        self.store.get_project(project_id)?;

        let mut response = ScheduleBatchResponse::default();
        for item in items {
            let outcome = self.store.get_post(&item.post_id).and_then(|post| {
                ensure_in_project(&post, project_id)?;
                let platform = item.platform.unwrap_or(post.platform);
                self.engine
                    .schedule(&post.id, platform, item.scheduled_time, &item.timezone)
            });
            match outcome {
                Ok(record) => response.scheduled_post_ids.push(record.id),
                Err(e) => response.failures.push(failure(&item.post_id, &e)),
            }
        }
        response.scheduled_count = response.scheduled_post_ids.len();
        tracing::info!(
            project_id = %project_id,
            scheduled = response.scheduled_count,
            failed = response.failures.len(),
            "schedule batch processed"
        );
        Ok(response)
    }

    /// Queue posts for immediate delivery on their own platforms.
    ///
    /// The project enters Publishing up front. Each post becomes one
    /// critical-lane task; per-platform outcomes are recorded on the
    /// scheduled-post records.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown project. Per-post problems, including a full
    /// queue, are reported in `failures`.
    pub fn publish_now<S: AsRef<str>>(
        &self,
        project_id: &str,
        post_ids: &[S],
    ) -> Result<PublishNowResponse, PipelineError> {
        self.store.get_project(project_id)?;

        let mut accepted = Vec::with_capacity(post_ids.len());
        let mut response = PublishNowResponse::default();
        for id in post_ids {
            let id = id.as_ref();
            let checked = self.store.get_post(id).and_then(|post| {
                ensure_in_project(&post, project_id)?;
                if post.archived.is_some()
                    || !matches!(post.status, PostStatus::Approved | PostStatus::Scheduled)
                {
                    return Err(PipelineError::conflict(format!(
                        "post {id} is {:?} and cannot be published",
                        post.status
                    )));
                }
                Ok(post)
            });
            match checked {
                Ok(post) => accepted.push(post),
                Err(e) => response.failures.push(failure(id, &e)),
            }
        }
        if accepted.is_empty() {
            return Ok(response);
        }

        self.dispatcher.start_publishing(project_id);
        for post in accepted {
            let task = PipelineTask::PublishPost {
                post_id: post.id.clone(),
                platforms: vec![post.platform],
            };
            match self.pool.submit_detached(task.lane(), task.label(), task) {
                Ok(key) => response.job_ids.push(key.to_string()),
                Err(e) => response.failures.push(failure(&post.id, &e.into())),
            }
        }
        response.queued_count = response.job_ids.len();
        tracing::info!(
            project_id = %project_id,
            queued = response.queued_count,
            failed = response.failures.len(),
            "publish-now queued"
        );
        Ok(response)
    }

    /// Cancel a scheduled post before it is claimed.
    ///
    /// # Errors
    ///
    /// `StateConflict` if Published, Processing, or already Cancelled.
    pub fn cancel_scheduled(&self, id: &str, reason: &str) -> Result<ScheduledPost, PipelineError> {
        self.engine.cancel(id, reason)
    }

    /// Move a scheduled post to a new time with a fresh retry budget.
    ///
    /// # Errors
    ///
    /// See [`ScheduledPostEngine::reschedule`].
    pub fn reschedule(&self, id: &str, new_time: DateTime<Utc>) -> Result<ScheduledPost, PipelineError> {
        self.engine.reschedule(id, new_time)
    }

    /// Put a failed record back in the queue and dispatch it now.
    ///
    /// When the critical queue is full the record stays Pending and the
    /// publishing job picks it up.
    ///
    /// # Errors
    ///
    /// `StateConflict` when the record is not Failed or its retries are spent.
    pub fn retry_failed(&self, id: &str) -> Result<ScheduledPost, PipelineError> {
        let record = self.engine.reset_for_retry(id)?;
        let task = PipelineTask::PublishScheduled {
            scheduled_post_id: record.id.clone(),
        };
        match self.pool.submit_detached(task.lane(), task.label(), task) {
            Ok(_) | Err(PoolError::QueueFull(_)) => Ok(record),
            Err(e) => Err(e.into()),
        }
    }

    /// Where a project stands.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown project.
    pub fn get_pipeline_status(&self, project_id: &str) -> Result<PipelineStatus, PipelineError> {
        let project = self.store.get_project(project_id)?;
        let insights = self.store.insights_for_project(project_id)?;
        let posts = self.store.posts_for_project(project_id)?;
        let records = self.store.scheduled_for_project(project_id)?;

        let posts_in = |status: PostStatus| posts.iter().filter(|p| p.status == status).count();
        let records_in =
            |status: ScheduledPostStatus| records.iter().filter(|r| r.status == status).count();
        let counts = PipelineCounts {
            insights: insights.len(),
            insights_approved: insights
                .iter()
                .filter(|i| i.status == InsightStatus::Approved)
                .count(),
            posts: posts.len(),
            posts_approved: posts_in(PostStatus::Approved),
            posts_scheduled: posts_in(PostStatus::Scheduled),
            posts_published: posts_in(PostStatus::Published),
            posts_failed: posts_in(PostStatus::Failed),
            pending_deliveries: records_in(ScheduledPostStatus::Pending),
            failed_deliveries: records_in(ScheduledPostStatus::Failed),
        };

        Ok(PipelineStatus {
            project_id: project.id.clone(),
            stage: project.stage,
            progress_percent: project.stage.progress_percent(),
            allowed_transitions: project.allowed_actions(),
            counts,
        })
    }

    /// Queue a content-stage action on the default lane.
    ///
    /// Returns the worker pool task id.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown project, `StateConflict` when the action is
    /// not legal from the current stage, `Backend` when the queue refuses the
    /// task.
    pub fn advance_project(&self, project_id: &str, action: ProjectAction) -> Result<String, PipelineError> {
        let project = self.store.get_project(project_id)?;
        if action.target(project.stage).is_none() {
            return Err(PipelineError::conflict(format!(
                "project {project_id} cannot {action:?} from stage {}",
                project.stage
            )));
        }
        let task = PipelineTask::AdvanceProject {
            project_id: project_id.to_string(),
            action,
        };
        let key = self.pool.submit_detached(task.lane(), task.label(), task)?;
        Ok(key.to_string())
    }
}

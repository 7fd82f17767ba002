//! Editorial review of insights and posts.
//!
//! The workflow loads a snapshot, applies the guarded entity operation,
//! persists with a compare-and-swap on the status it read, records the
//! activity, then nudges the parent project forward once its review gate is
//! satisfied.

use std::sync::Arc;

use super::activity::ActivityRecorder;
use super::batch::BatchReport;
use super::model::{
    Insight, InsightStatus, Post, PostStatus, ProjectAction, ProjectStage,
};
use super::store::PipelineStore;
use super::PipelineError;
use crate::util::SharedClock;

/// Apply `action` to a project if it is legal from its current stage.
///
/// Returns `Ok(false)` when the action does not apply; any other failure
/// (missing project, lost CAS race) is an error.
pub(crate) fn advance_project(
    store: &dyn PipelineStore,
    activity: &ActivityRecorder,
    clock: &SharedClock,
    project_id: &str,
    action: ProjectAction,
) -> Result<bool, PipelineError> {
    let project = store.get_project(project_id)?;
    if action.target(project.stage).is_none() {
        return Ok(false);
    }
    let t = project.apply(action, clock.now())?;
    store.update_project(&t.next, project.stage)?;
    tracing::info!(
        project_id = %project_id,
        from = %project.stage,
        to = %t.next.stage,
        "project stage advanced"
    );
    activity.record_event(t.event);
    Ok(true)
}

/// Review operations over insights and posts.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    store: Arc<dyn PipelineStore>,
    activity: ActivityRecorder,
    clock: SharedClock,
}

impl ApprovalWorkflow {
    /// Create a workflow over `store`.
    pub fn new(store: Arc<dyn PipelineStore>, activity: ActivityRecorder, clock: SharedClock) -> Self {
        Self {
            store,
            activity,
            clock,
        }
    }

    fn commit_insight(
        &self,
        id: &str,
        op: impl FnOnce(&Insight) -> Result<super::model::Transition<Insight>, PipelineError>,
    ) -> Result<Insight, PipelineError> {
        let current = self.store.get_insight(id)?;
        let t = op(&current)?;
        self.store.update_insight(&t.next, current.status)?;
        self.activity.record_event(t.event);
        Ok(t.next)
    }

    fn commit_post(
        &self,
        id: &str,
        op: impl FnOnce(&Post) -> Result<super::model::Transition<Post>, PipelineError>,
    ) -> Result<Post, PipelineError> {
        let current = self.store.get_post(id)?;
        let t = op(&current)?;
        self.store.update_post(&t.next, current.status)?;
        self.activity.record_event(t.event);
        Ok(t.next)
    }

    /// Approve a draft insight.
    ///
    /// # Errors
    ///
    /// `NotFound`, `StateConflict`, or `Validation` for a blank reviewer.
    pub fn approve_insight(&self, id: &str, by: &str) -> Result<Insight, PipelineError> {
        let now = self.clock.now();
        let insight = self.commit_insight(id, |i| i.approve(by, now))?;
        self.after_insight_review(&insight.project_id);
        Ok(insight)
    }

    /// Reject a draft insight with a reason.
    ///
    /// # Errors
    ///
    /// `NotFound`, `StateConflict`, or `Validation` for a blank reason.
    pub fn reject_insight(&self, id: &str, by: &str, reason: &str) -> Result<Insight, PipelineError> {
        let now = self.clock.now();
        let insight = self.commit_insight(id, |i| i.reject(by, reason, now))?;
        self.after_insight_review(&insight.project_id);
        Ok(insight)
    }

    /// Archive an insight.
    ///
    /// # Errors
    ///
    /// `NotFound`, `StateConflict`, or `Validation` for a blank reason.
    pub fn archive_insight(&self, id: &str, by: &str, reason: &str) -> Result<Insight, PipelineError> {
        let now = self.clock.now();
        let insight = self.commit_insight(id, |i| i.archive(by, reason, now))?;
        self.after_insight_review(&insight.project_id);
        Ok(insight)
    }

    /// Approve a post.
    ///
    /// # Errors
    ///
    /// `NotFound`, `StateConflict` (including "already approved"), or `Validation`.
    pub fn approve_post(&self, id: &str, by: &str) -> Result<Post, PipelineError> {
        let now = self.clock.now();
        let post = self.commit_post(id, |p| p.approve(by, now))?;
        self.after_post_review(&post.project_id);
        Ok(post)
    }

    /// Reject a post with a reason.
    ///
    /// # Errors
    ///
    /// `NotFound`, `StateConflict`, or `Validation` for a blank reason.
    pub fn reject_post(&self, id: &str, by: &str, reason: &str) -> Result<Post, PipelineError> {
        let now = self.clock.now();
        let post = self.commit_post(id, |p| p.reject(by, reason, now))?;
        self.after_post_review(&post.project_id);
        Ok(post)
    }

    /// Archive a post.
    ///
    /// # Errors
    ///
    /// `NotFound`, `StateConflict` (scheduled posts), or `Validation`.
    pub fn archive_post(&self, id: &str, by: &str, reason: &str) -> Result<Post, PipelineError> {
        let now = self.clock.now();
        let post = self.commit_post(id, |p| p.archive(by, reason, now))?;
        self.after_post_review(&post.project_id);
        Ok(post)
    }

    /// Approve several insights; each item succeeds or fails on its own.
    pub fn approve_insights<S: AsRef<str>>(&self, ids: &[S], by: &str) -> BatchReport {
        BatchReport::collect(ids, |id| self.approve_insight(id, by))
    }

    /// Reject several insights with one reason.
    pub fn reject_insights<S: AsRef<str>>(&self, ids: &[S], by: &str, reason: &str) -> BatchReport {
        BatchReport::collect(ids, |id| self.reject_insight(id, by, reason))
    }

    /// Approve several posts.
    pub fn approve_posts<S: AsRef<str>>(&self, ids: &[S], by: &str) -> BatchReport {
        BatchReport::collect(ids, |id| self.approve_post(id, by))
    }

    /// Reject several posts with one reason.
    pub fn reject_posts<S: AsRef<str>>(&self, ids: &[S], by: &str, reason: &str) -> BatchReport {
        BatchReport::collect(ids, |id| self.reject_post(id, by, reason))
    }

    fn after_insight_review(&self, project_id: &str) {
        let ready = self.store.insights_for_project(project_id).map(|insights| {
            let live: Vec<_> = insights.iter().filter(|i| i.archived.is_none()).collect();
            live.iter().all(|i| i.status != InsightStatus::Draft)
                && live.iter().any(|i| i.status == InsightStatus::Approved)
        });
        self.advance_if(project_id, ready, ProjectStage::InsightsReady, ProjectAction::ApproveInsights);
    }

    fn after_post_review(&self, project_id: &str) {
        let ready = self.store.posts_for_project(project_id).map(|posts| {
            let live: Vec<_> = posts.iter().filter(|p| p.is_live()).collect();
            live.iter().all(|p| p.status != PostStatus::Draft)
                && live.iter().any(|p| p.status == PostStatus::Approved)
        });
        self.advance_if(project_id, ready, ProjectStage::PostsGenerated, ProjectAction::ApprovePosts);
    }

    fn advance_if(
        &self,
        project_id: &str,
        ready: Result<bool, PipelineError>,
        gate: ProjectStage,
        action: ProjectAction,
    ) {
        let outcome = ready.and_then(|ready| {
            if !ready {
                return Ok(false);
            }
            let stage = self.store.get_project(project_id)?.stage;
            if stage != gate {
                return Ok(false);
            }
            advance_project(self.store.as_ref(), &self.activity, &self.clock, project_id, action)
        });
        if let Err(e) = outcome {
            // The review itself is already committed.
            tracing::warn!(project_id = %project_id, error = %e, "project stage not advanced after review");
        }
    }
}

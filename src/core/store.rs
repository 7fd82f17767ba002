//! Persistence interface.
//!
//! Every update is a compare-and-swap on the status the caller read. A
//! mismatch means another writer got there first and surfaces as
//! [`PipelineError::StateConflict`]; callers never overwrite blindly.

use chrono::{DateTime, Utc};

use super::model::{
    ContentProject, Insight, InsightStatus, JobStatus, Post, PostStatus, ProjectStage,
    RecurringJobRecord, ScheduledPost, ScheduledPostStatus,
};
use super::PipelineError;

/// Check run against every stored scheduled post, under the same lock as
/// the insert. Returning an error aborts the insert.
pub type InsertGuard<'a> = &'a dyn Fn(&ScheduledPost) -> Result<(), PipelineError>;

/// Storage backend for pipeline entities.
pub trait PipelineStore: Send + Sync {
    /// Insert a new project.
    fn insert_project(&self, project: ContentProject) -> Result<(), PipelineError>;
    /// Fetch a project.
    fn get_project(&self, id: &str) -> Result<ContentProject, PipelineError>;
    /// Replace a project if its stage is still `expected`.
    fn update_project(
        &self,
        next: &ContentProject,
        expected: ProjectStage,
    ) -> Result<(), PipelineError>;
    /// All projects.
    fn list_projects(&self) -> Result<Vec<ContentProject>, PipelineError>;

    /// Insert a new insight.
    fn insert_insight(&self, insight: Insight) -> Result<(), PipelineError>;
    /// Fetch an insight.
    fn get_insight(&self, id: &str) -> Result<Insight, PipelineError>;
    /// Replace an insight if its status is still `expected`.
    fn update_insight(&self, next: &Insight, expected: InsightStatus) -> Result<(), PipelineError>;
    /// Insights of a project.
    fn insights_for_project(&self, project_id: &str) -> Result<Vec<Insight>, PipelineError>;

    /// Insert a new post.
    fn insert_post(&self, post: Post) -> Result<(), PipelineError>;
    /// Fetch a post.
    fn get_post(&self, id: &str) -> Result<Post, PipelineError>;
    /// Replace a post if its status is still `expected`.
    fn update_post(&self, next: &Post, expected: PostStatus) -> Result<(), PipelineError>;
    /// Posts of a project.
    fn posts_for_project(&self, project_id: &str) -> Result<Vec<Post>, PipelineError>;

    /// Insert a scheduled post once `guard` accepted every stored record.
    fn insert_scheduled(
        &self,
        record: ScheduledPost,
        guard: InsertGuard<'_>,
    ) -> Result<(), PipelineError>;
    /// Fetch a scheduled post.
    fn get_scheduled(&self, id: &str) -> Result<ScheduledPost, PipelineError>;
    /// Replace a scheduled post if its status is still `expected`.
    fn update_scheduled(
        &self,
        next: &ScheduledPost,
        expected: ScheduledPostStatus,
    ) -> Result<(), PipelineError>;
    /// Scheduled posts delivering `post_id`.
    fn scheduled_for_post(&self, post_id: &str) -> Result<Vec<ScheduledPost>, PipelineError>;
    /// Scheduled posts of a project.
    fn scheduled_for_project(&self, project_id: &str)
        -> Result<Vec<ScheduledPost>, PipelineError>;
    /// Scheduled posts in `status`, oldest due time first.
    fn scheduled_by_status(
        &self,
        status: ScheduledPostStatus,
    ) -> Result<Vec<ScheduledPost>, PipelineError>;

    /// Insert a job execution record.
    fn insert_job_record(&self, record: RecurringJobRecord) -> Result<(), PipelineError>;
    /// Replace a job record if its status is still `expected`.
    fn update_job_record(
        &self,
        next: &RecurringJobRecord,
        expected: JobStatus,
    ) -> Result<(), PipelineError>;
    /// Most recently queued record of a job.
    fn latest_job_record(&self, job_id: &str) -> Result<Option<RecurringJobRecord>, PipelineError>;
    /// Number of records in `status`.
    fn count_job_records(&self, status: JobStatus) -> Result<usize, PipelineError>;
    /// Delete finished records queued before `before`; returns how many.
    fn prune_job_records(&self, before: DateTime<Utc>) -> Result<usize, PipelineError>;
}

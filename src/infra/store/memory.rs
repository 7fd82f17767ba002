//! In-memory store for development and tests.

use std::collections::HashMap;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::core::model::{
    ContentProject, Insight, InsightStatus, JobStatus, Post, PostStatus, ProjectStage,
    RecurringJobRecord, ScheduledPost, ScheduledPostStatus,
};
use crate::core::store::{InsertGuard, PipelineStore};
use crate::core::PipelineError;

type Table<T> = RwLock<HashMap<String, T>>;

fn insert_new<T>(
    table: &Table<T>,
    entity: &'static str,
    id: &str,
    value: T,
) -> Result<(), PipelineError> {
    let mut rows = table.write();
    if rows.contains_key(id) {
        return Err(PipelineError::conflict(format!("{entity} `{id}` already exists")));
    }
    rows.insert(id.to_string(), value);
    Ok(())
}

fn fetch<T: Clone>(table: &Table<T>, entity: &'static str, id: &str) -> Result<T, PipelineError> {
    table
        .read()
        .get(id)
        .cloned()
        .ok_or_else(|| PipelineError::not_found(entity, id))
}

/// Replace `id` with `next` if `status(current) == expected`.
fn compare_and_swap<T, S>(
    table: &Table<T>,
    entity: &'static str,
    id: &str,
    next: &T,
    expected: S,
    status: impl Fn(&T) -> S,
) -> Result<(), PipelineError>
where
    T: Clone,
    S: PartialEq + Debug,
{
    let mut rows = table.write();
    let current = rows
        .get_mut(id)
        .ok_or_else(|| PipelineError::not_found(entity, id))?;
    let actual = status(current);
    if actual != expected {
        return Err(PipelineError::conflict(format!(
            "{entity} `{id}` is {actual:?}, expected {expected:?}"
        )));
    }
    *current = next.clone();
    Ok(())
}

fn select<T: Clone>(table: &Table<T>, keep: impl Fn(&T) -> bool) -> Vec<T> {
    table.read().values().filter(|v| keep(v)).cloned().collect()
}

/// Thread-safe in-memory [`PipelineStore`].
#[derive(Default)]
pub struct InMemoryPipelineStore {
    projects: Table<ContentProject>,
    insights: Table<Insight>,
    posts: Table<Post>,
    scheduled: Table<ScheduledPost>,
    // Insertion order breaks ties between records queued in the same instant.
    job_records: RwLock<Vec<RecurringJobRecord>>,
}

impl InMemoryPipelineStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of job records retained.
    #[must_use]
    pub fn job_record_count(&self) -> usize {
        self.job_records.read().len()
    }
}

impl PipelineStore for InMemoryPipelineStore {
    fn insert_project(&self, project: ContentProject) -> Result<(), PipelineError> {
        let id = project.id.clone();
        insert_new(&self.projects, "project", &id, project)
    }

    fn get_project(&self, id: &str) -> Result<ContentProject, PipelineError> {
        fetch(&self.projects, "project", id)
    }

    fn update_project(
        &self,
        next: &ContentProject,
        expected: ProjectStage,
    ) -> Result<(), PipelineError> {
        compare_and_swap(&self.projects, "project", &next.id, next, expected, |p| p.stage)
    }

    fn list_projects(&self) -> Result<Vec<ContentProject>, PipelineError> {
        let mut projects = select(&self.projects, |_| true);
        projects.sort_by_key(|p| p.created_at);
        Ok(projects)
    }

    fn insert_insight(&self, insight: Insight) -> Result<(), PipelineError> {
        let id = insight.id.clone();
        insert_new(&self.insights, "insight", &id, insight)
    }

    fn get_insight(&self, id: &str) -> Result<Insight, PipelineError> {
        fetch(&self.insights, "insight", id)
    }

    fn update_insight(&self, next: &Insight, expected: InsightStatus) -> Result<(), PipelineError> {
        compare_and_swap(&self.insights, "insight", &next.id, next, expected, |i| i.status)
    }

    fn insights_for_project(&self, project_id: &str) -> Result<Vec<Insight>, PipelineError> {
        let mut insights = select(&self.insights, |i| i.project_id == project_id);
        insights.sort_by_key(|i| i.created_at);
        Ok(insights)
    }

    fn insert_post(&self, post: Post) -> Result<(), PipelineError> {
        let id = post.id.clone();
        insert_new(&self.posts, "post", &id, post)
    }

    fn get_post(&self, id: &str) -> Result<Post, PipelineError> {
        fetch(&self.posts, "post", id)
    }

    fn update_post(&self, next: &Post, expected: PostStatus) -> Result<(), PipelineError> {
        compare_and_swap(&self.posts, "post", &next.id, next, expected, |p| p.status)
    }

    fn posts_for_project(&self, project_id: &str) -> Result<Vec<Post>, PipelineError> {
        let mut posts = select(&self.posts, |p| p.project_id == project_id);
        posts.sort_by_key(|p| p.created_at);
        Ok(posts)
    }

    fn insert_scheduled(
        &self,
        record: ScheduledPost,
        guard: InsertGuard<'_>,
    ) -> Result<(), PipelineError> {
        let mut rows = self.scheduled.write();
        if rows.contains_key(&record.id) {
            return Err(PipelineError::conflict(format!(
                "scheduled post `{}` already exists",
                record.id
            )));
        }
        for existing in rows.values() {
            guard(existing)?;
        }
        rows.insert(record.id.clone(), record);
        Ok(())
    }

    fn get_scheduled(&self, id: &str) -> Result<ScheduledPost, PipelineError> {
        fetch(&self.scheduled, "scheduled post", id)
    }

    fn update_scheduled(
        &self,
        next: &ScheduledPost,
        expected: ScheduledPostStatus,
    ) -> Result<(), PipelineError> {
        compare_and_swap(
            &self.scheduled,
            "scheduled post",
            &next.id,
            next,
            expected,
            |r| r.status,
        )
    }

    fn scheduled_for_post(&self, post_id: &str) -> Result<Vec<ScheduledPost>, PipelineError> {
        let mut records = select(&self.scheduled, |r| r.post_id == post_id);
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    fn scheduled_for_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<ScheduledPost>, PipelineError> {
        let mut records = select(&self.scheduled, |r| r.project_id == project_id);
        records.sort_by_key(|r| r.scheduled_time);
        Ok(records)
    }

    fn scheduled_by_status(
        &self,
        status: ScheduledPostStatus,
    ) -> Result<Vec<ScheduledPost>, PipelineError> {
        let mut records = select(&self.scheduled, |r| r.status == status);
        records.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(records)
    }

    fn insert_job_record(&self, record: RecurringJobRecord) -> Result<(), PipelineError> {
        let mut records = self.job_records.write();
        if records.iter().any(|r| r.id == record.id) {
            return Err(PipelineError::conflict(format!(
                "job record `{}` already exists",
                record.id
            )));
        }
        records.push(record);
        Ok(())
    }

    fn update_job_record(
        &self,
        next: &RecurringJobRecord,
        expected: JobStatus,
    ) -> Result<(), PipelineError> {
        let mut records = self.job_records.write();
        let current = records
            .iter_mut()
            .find(|r| r.id == next.id)
            .ok_or_else(|| PipelineError::not_found("job record", next.id.as_str()))?;
        if current.status != expected {
            return Err(PipelineError::conflict(format!(
                "job record `{}` is {:?}, expected {expected:?}",
                next.id, current.status
            )));
        }
        *current = next.clone();
        Ok(())
    }

    fn latest_job_record(&self, job_id: &str) -> Result<Option<RecurringJobRecord>, PipelineError> {
        Ok(self
            .job_records
            .read()
            .iter()
            .filter(|r| r.job_id == job_id)
            .max_by_key(|r| r.queued_at)
            .cloned())
    }

    fn count_job_records(&self, status: JobStatus) -> Result<usize, PipelineError> {
        Ok(self
            .job_records
            .read()
            .iter()
            .filter(|r| r.status == status)
            .count())
    }

    fn prune_job_records(&self, before: DateTime<Utc>) -> Result<usize, PipelineError> {
        let mut records = self.job_records.write();
        let initial = records.len();
        records.retain(|r| !(r.status.is_finished() && r.queued_at < before));
        Ok(initial - records.len())
    }
}

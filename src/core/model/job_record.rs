//! Execution records of recurring jobs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::PipelineError;
use crate::util::{new_id, EntityId};

/// Kind of background work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Dispatch scheduled posts that are due.
    PublishDuePosts,
    /// Re-queue failed posts whose backoff elapsed.
    RetryFailedPosts,
    /// Drop old job records and activity.
    Cleanup,
    /// Recompute project aggregates.
    Analytics,
    /// Recover stale claims.
    HealthCheck,
    /// On-demand content stage work (cleaning, extraction, generation).
    ContentStage,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PublishDuePosts => "publish_due_posts",
            Self::RetryFailedPosts => "retry_failed_posts",
            Self::Cleanup => "cleanup",
            Self::Analytics => "analytics",
            Self::HealthCheck => "health_check",
            Self::ContentStage => "content_stage",
        };
        f.write_str(name)
    }
}

/// Status of one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Triggered, not yet running.
    Queued,
    /// Running.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Dropped before it ran.
    Cancelled,
}

impl JobStatus {
    /// Whether the execution is over.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One triggered execution of a recurring job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringJobRecord {
    /// Record identifier.
    pub id: EntityId,
    /// Job identifier, e.g. `publish-due-posts`.
    pub job_id: String,
    /// Job kind.
    pub job_type: JobType,
    /// Execution status.
    pub status: JobStatus,
    /// Progress in percent.
    pub progress: u8,
    /// Trigger time.
    pub queued_at: DateTime<Utc>,
    /// Start of execution.
    pub started_at: Option<DateTime<Utc>>,
    /// End of execution.
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall time between start and finish.
    pub duration_ms: Option<i64>,
    /// Failure detail.
    pub error: Option<String>,
}

impl RecurringJobRecord {
    /// New queued record.
    pub fn queued(job_id: impl Into<String>, job_type: JobType, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id("job"),
            job_id: job_id.into(),
            job_type,
            status: JobStatus::Queued,
            progress: 0,
            queued_at: now,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            error: None,
        }
    }

    fn require(&self, want: JobStatus, op: &str) -> Result<(), PipelineError> {
        if self.status != want {
            return Err(PipelineError::conflict(format!(
                "job record {} cannot {op} from {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Queued → Processing.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless queued.
    pub fn start(&self, now: DateTime<Utc>) -> Result<Self, PipelineError> {
        self.require(JobStatus::Queued, "start")?;
        let mut next = self.clone();
        next.status = JobStatus::Processing;
        next.started_at = Some(now);
        Ok(next)
    }

    /// Update progress while processing; clamped to 100.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless processing.
    pub fn progress(&self, percent: u8) -> Result<Self, PipelineError> {
        self.require(JobStatus::Processing, "report progress")?;
        let mut next = self.clone();
        next.progress = percent.min(100);
        Ok(next)
    }

    /// Processing → Completed.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless processing.
    pub fn complete(&self, now: DateTime<Utc>) -> Result<Self, PipelineError> {
        self.require(JobStatus::Processing, "complete")?;
        let mut next = self.finish(JobStatus::Completed, now);
        next.progress = 100;
        Ok(next)
    }

    /// Processing → Failed.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless processing.
    pub fn fail(&self, error: &str, now: DateTime<Utc>) -> Result<Self, PipelineError> {
        self.require(JobStatus::Processing, "fail")?;
        let mut next = self.finish(JobStatus::Failed, now);
        next.error = Some(error.to_string());
        Ok(next)
    }

    /// Queued → Cancelled.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless queued.
    pub fn cancel(&self, now: DateTime<Utc>) -> Result<Self, PipelineError> {
        self.require(JobStatus::Queued, "cancel")?;
        Ok(self.finish(JobStatus::Cancelled, now))
    }

    fn finish(&self, status: JobStatus, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.finished_at = Some(now);
        next.duration_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds());
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn lifecycle_records_duration() {
        let t0 = Utc::now();
        let rec = RecurringJobRecord::queued("cleanup", JobType::Cleanup, t0);
        let rec = rec.start(t0).unwrap();
        let rec = rec.progress(250).unwrap();
        assert_eq!(rec.progress, 100);
        let rec = rec.complete(t0 + Duration::milliseconds(1500)).unwrap();
        assert_eq!(rec.status, JobStatus::Completed);
        assert_eq!(rec.duration_ms, Some(1500));
    }

    #[test]
    fn failure_keeps_error() {
        let t0 = Utc::now();
        let rec = RecurringJobRecord::queued("analytics", JobType::Analytics, t0)
            .start(t0)
            .unwrap()
            .fail("store unavailable", t0)
            .unwrap();
        assert_eq!(rec.status, JobStatus::Failed);
        assert_eq!(rec.error.as_deref(), Some("store unavailable"));
        assert!(rec.complete(t0).unwrap_err().is_conflict());
    }

    #[test]
    fn only_queued_records_cancel() {
        let t0 = Utc::now();
        let rec = RecurringJobRecord::queued("cleanup", JobType::Cleanup, t0);
        assert!(rec.start(t0).unwrap().cancel(t0).is_err());
        assert_eq!(rec.cancel(t0).unwrap().status, JobStatus::Cancelled);
        assert_eq!(rec.cancel(t0).unwrap().duration_ms, None);
    }
}

//! Generated social post.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{require_actor, require_reason, ArchiveInfo, DomainEvent, ReviewInfo, Transition};
use crate::core::PipelineError;
use crate::util::{new_id, EntityId, Platform};

/// Lifecycle state of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    /// Generated, awaiting review.
    Draft,
    /// Approved for publishing.
    Approved,
    /// Rejected by a reviewer.
    Rejected,
    /// Has at least one active scheduled-post record.
    Scheduled,
    /// Delivered to at least one platform.
    Published,
    /// Delivery failed for good.
    Failed,
}

/// A post generated from an insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Identifier.
    pub id: EntityId,
    /// Parent project.
    pub project_id: EntityId,
    /// Source insight.
    pub insight_id: EntityId,
    /// Owner; publishing uses this user's credentials.
    pub user_id: String,
    /// Primary platform the draft was written for.
    pub platform: Platform,
    /// Post body.
    pub content: String,
    /// Lifecycle state.
    pub status: PostStatus,
    /// Approval decision.
    pub approval: Option<ReviewInfo>,
    /// Rejection decision.
    pub rejection: Option<ReviewInfo>,
    /// First successful publish.
    pub published_at: Option<DateTime<Utc>>,
    /// Last failure message.
    pub error_message: Option<String>,
    /// Archive marker.
    pub archived: Option<ArchiveInfo>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// New draft post.
    pub fn new(
        project_id: impl Into<EntityId>,
        insight_id: impl Into<EntityId>,
        user_id: impl Into<String>,
        platform: Platform,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id("post"),
            project_id: project_id.into(),
            insight_id: insight_id.into(),
            user_id: user_id.into(),
            platform,
            content: content.into(),
            status: PostStatus::Draft,
            approval: None,
            rejection: None,
            published_at: None,
            error_message: None,
            archived: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the post still counts toward project completion.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.archived.is_none() && self.status != PostStatus::Rejected
    }

    fn ensure_active(&self) -> Result<(), PipelineError> {
        if self.archived.is_some() {
            return Err(PipelineError::conflict(format!("post {} is archived", self.id)));
        }
        Ok(())
    }

    fn illegal(&self, op: &str) -> PipelineError {
        PipelineError::conflict(format!(
            "post {} cannot {op} from status {:?}",
            self.id, self.status
        ))
    }

    fn event(&self, kind: &str, description: String) -> DomainEvent {
        DomainEvent::new("post", &self.id, kind, description).with_metadata(serde_json::json!({
            "project_id": self.project_id,
            "platform": self.platform,
        }))
    }

    /// Approve the post. Drafts, rejected and failed posts may be approved.
    ///
    /// # Errors
    ///
    /// `StateConflict` if the post is already approved or further along.
    pub fn approve(&self, by: &str, now: DateTime<Utc>) -> Result<Transition<Self>, PipelineError> {
        let by = require_actor(by)?;
        self.ensure_active()?;
        match self.status {
            PostStatus::Draft | PostStatus::Rejected | PostStatus::Failed => {}
            PostStatus::Approved => {
                return Err(PipelineError::conflict(format!(
                    "post {} is already approved",
                    self.id
                )))
            }
            PostStatus::Scheduled | PostStatus::Published => return Err(self.illegal("approve")),
        }
        let mut next = self.clone();
        next.status = PostStatus::Approved;
        next.approval = Some(ReviewInfo {
            by: by.clone(),
            at: now,
            reason: None,
        });
        next.rejection = None;
        next.error_message = None;
        next.updated_at = now;
        let event = self.event("post.approved", format!("approved by {by}"));
        Ok(Transition { next, event })
    }

    /// Reject a draft or approved post.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty reason, `StateConflict` if the post is not under review.
    pub fn reject(
        &self,
        by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition<Self>, PipelineError> {
        let by = require_actor(by)?;
        let reason = require_reason(reason, "rejecting a post")?;
        self.ensure_active()?;
        if !matches!(self.status, PostStatus::Draft | PostStatus::Approved) {
            return Err(self.illegal("reject"));
        }
        let mut next = self.clone();
        next.status = PostStatus::Rejected;
        next.rejection = Some(ReviewInfo {
            by: by.clone(),
            at: now,
            reason: Some(reason.clone()),
        });
        next.updated_at = now;
        let event = self.event("post.rejected", format!("rejected by {by}: {reason}"));
        Ok(Transition { next, event })
    }

    /// Archive the post. Scheduled posts must be cancelled first.
    ///
    /// # Errors
    ///
    /// `StateConflict` if scheduled or already archived.
    pub fn archive(
        &self,
        by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition<Self>, PipelineError> {
        let by = require_actor(by)?;
        let reason = require_reason(reason, "archiving a post")?;
        self.ensure_active()?;
        if self.status == PostStatus::Scheduled {
            return Err(self.illegal("archive"));
        }
        let mut next = self.clone();
        next.archived = Some(ArchiveInfo {
            by: by.clone(),
            at: now,
            reason: reason.clone(),
        });
        next.updated_at = now;
        let event = self.event("post.archived", format!("archived by {by}: {reason}"));
        Ok(Transition { next, event })
    }

    /// Approved → Scheduled.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless the post is approved.
    pub fn mark_as_scheduled(&self, now: DateTime<Utc>) -> Result<Transition<Self>, PipelineError> {
        self.ensure_active()?;
        if self.status != PostStatus::Approved {
            return Err(PipelineError::conflict(format!(
                "post {} must be approved before scheduling (status {:?})",
                self.id, self.status
            )));
        }
        let mut next = self.clone();
        next.status = PostStatus::Scheduled;
        next.updated_at = now;
        Ok(Transition {
            next,
            event: self.event("post.scheduled", "scheduled for publishing".into()),
        })
    }

    /// Scheduled → Approved, used when the last active schedule is cancelled.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless the post is scheduled.
    pub fn unschedule(&self, now: DateTime<Utc>) -> Result<Transition<Self>, PipelineError> {
        if self.status != PostStatus::Scheduled {
            return Err(self.illegal("unschedule"));
        }
        let mut next = self.clone();
        next.status = PostStatus::Approved;
        next.updated_at = now;
        Ok(Transition {
            next,
            event: self.event("post.unscheduled", "returned to approved".into()),
        })
    }

    /// Record a successful publish.
    ///
    /// # Errors
    ///
    /// `StateConflict` if the post was never approved or is already published.
    pub fn mark_as_published(
        &self,
        published_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Transition<Self>, PipelineError> {
        if !matches!(
            self.status,
            PostStatus::Approved | PostStatus::Scheduled | PostStatus::Failed
        ) {
            return Err(self.illegal("publish"));
        }
        let mut next = self.clone();
        next.status = PostStatus::Published;
        next.published_at = Some(published_at);
        next.error_message = None;
        next.updated_at = now;
        Ok(Transition {
            next,
            event: self.event("post.published", format!("published at {published_at}")),
        })
    }

    /// Record a final delivery failure.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless the post is approved or scheduled.
    pub fn mark_as_failed(
        &self,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition<Self>, PipelineError> {
        if !matches!(self.status, PostStatus::Approved | PostStatus::Scheduled) {
            return Err(self.illegal("fail"));
        }
        let mut next = self.clone();
        next.status = PostStatus::Failed;
        next.error_message = Some(message.to_string());
        next.updated_at = now;
        Ok(Transition {
            next,
            event: self.event("post.failed", format!("publishing failed: {message}")),
        })
    }
}

//! Extracted insight awaiting editorial review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{require_actor, require_reason, ArchiveInfo, DomainEvent, ReviewInfo, Transition};
use crate::core::PipelineError;
use crate::util::{new_id, EntityId};

/// Review state of an insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    /// Under review.
    Draft,
    /// Accepted for post generation.
    Approved,
    /// Discarded. A rejected insight is never revived.
    Rejected,
}

/// An insight extracted from a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Identifier.
    pub id: EntityId,
    /// Parent project.
    pub project_id: EntityId,
    /// Source transcript.
    pub transcript_id: EntityId,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Review state.
    pub status: InsightStatus,
    /// Last review decision.
    pub review: Option<ReviewInfo>,
    /// Archive marker.
    pub archived: Option<ArchiveInfo>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

impl Insight {
    /// New draft insight.
    pub fn new(
        project_id: impl Into<EntityId>,
        transcript_id: impl Into<EntityId>,
        title: impl Into<String>,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id("ins"),
            project_id: project_id.into(),
            transcript_id: transcript_id.into(),
            title: title.into(),
            content: content.into(),
            status: InsightStatus::Draft,
            review: None,
            archived: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn ensure_active(&self) -> Result<(), PipelineError> {
        if self.archived.is_some() {
            return Err(PipelineError::conflict(format!(
                "insight {} is archived",
                self.id
            )));
        }
        Ok(())
    }

    /// Approve a draft.
    ///
    /// # Errors
    ///
    /// `StateConflict` if already approved, rejected or archived.
    pub fn approve(&self, by: &str, now: DateTime<Utc>) -> Result<Transition<Self>, PipelineError> {
        let by = require_actor(by)?;
        self.ensure_active()?;
        match self.status {
            InsightStatus::Draft => {}
            InsightStatus::Approved => {
                return Err(PipelineError::conflict(format!(
                    "insight {} is already approved",
                    self.id
                )))
            }
            InsightStatus::Rejected => {
                return Err(PipelineError::conflict(format!(
                    "insight {} was rejected; create a new insight instead",
                    self.id
                )))
            }
        }
        let mut next = self.clone();
        next.status = InsightStatus::Approved;
        next.review = Some(ReviewInfo {
            by: by.clone(),
            at: now,
            reason: None,
        });
        next.updated_at = now;
        let event = DomainEvent::new("insight", &self.id, "insight.approved", format!("approved by {by}"))
            .with_metadata(serde_json::json!({ "project_id": self.project_id, "by": by }));
        Ok(Transition { next, event })
    }

    /// Reject a draft.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty reason, `StateConflict` if the insight is not under review.
    pub fn reject(
        &self,
        by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition<Self>, PipelineError> {
        let by = require_actor(by)?;
        let reason = require_reason(reason, "rejecting an insight")?;
        self.ensure_active()?;
        if self.status != InsightStatus::Draft {
            return Err(PipelineError::conflict(format!(
                "insight {} is not under review (status {:?})",
                self.id, self.status
            )));
        }
        let mut next = self.clone();
        next.status = InsightStatus::Rejected;
        next.review = Some(ReviewInfo {
            by: by.clone(),
            at: now,
            reason: Some(reason.clone()),
        });
        next.updated_at = now;
        let event = DomainEvent::new("insight", &self.id, "insight.rejected", format!("rejected by {by}: {reason}"))
            .with_metadata(serde_json::json!({ "project_id": self.project_id, "by": by, "reason": reason }));
        Ok(Transition { next, event })
    }

    /// Archive the insight. Status is preserved.
    ///
    /// # Errors
    ///
    /// `StateConflict` if already archived.
    pub fn archive(
        &self,
        by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition<Self>, PipelineError> {
        let by = require_actor(by)?;
        let reason = require_reason(reason, "archiving an insight")?;
        self.ensure_active()?;
        let mut next = self.clone();
        next.archived = Some(ArchiveInfo {
            by: by.clone(),
            at: now,
            reason: reason.clone(),
        });
        next.updated_at = now;
        let event = DomainEvent::new("insight", &self.id, "insight.archived", format!("archived by {by}: {reason}"))
            .with_metadata(serde_json::json!({ "project_id": self.project_id }));
        Ok(Transition { next, event })
    }
}

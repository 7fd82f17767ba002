//! Pipeline entities and their guarded transitions.
//!
//! Entities are plain data. Every state change goes through a named operation
//! that takes the current snapshot by reference and returns a
//! [`Transition`]: the next snapshot plus the [`DomainEvent`] describing it.
//! Nothing is mutated in place, so a rejected transition leaves no trace and
//! callers persist `next` with a compare-and-swap on the previous status.

pub mod insight;
pub mod job_record;
pub mod post;
pub mod project;
pub mod scheduled_post;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::EntityId;

pub use insight::{Insight, InsightStatus};
pub use job_record::{JobStatus, JobType, RecurringJobRecord};
pub use post::{Post, PostStatus};
pub use project::{ContentProject, ProjectAction, ProjectMetrics, ProjectStage};
pub use scheduled_post::{BackoffPolicy, ScheduledPost, ScheduledPostStatus};

/// Result of a successful guarded operation.
#[derive(Debug, Clone)]
pub struct Transition<T> {
    /// Entity state after the operation.
    pub next: T,
    /// What happened, for the activity log.
    pub event: DomainEvent,
}

/// Description of a state change, emitted by every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Entity that changed.
    pub entity_id: EntityId,
    /// Entity kind (`project`, `insight`, `post`, `scheduled_post`).
    pub entity_type: String,
    /// Dotted event name, e.g. `post.approved`.
    pub kind: String,
    /// Human readable summary.
    pub description: String,
    /// Structured context.
    pub metadata: serde_json::Value,
}

impl DomainEvent {
    pub(crate) fn new(
        entity_type: &str,
        entity_id: &str,
        kind: &str,
        description: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            kind: kind.to_string(),
            description: description.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub(crate) fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Who reviewed an entity, when, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewInfo {
    /// Reviewer identifier.
    pub by: String,
    /// Review timestamp.
    pub at: DateTime<Utc>,
    /// Reason given (required for rejections).
    pub reason: Option<String>,
}

/// Soft-archive marker. Archived entities accept no further review actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    /// Who archived the entity.
    pub by: String,
    /// When.
    pub at: DateTime<Utc>,
    /// Why.
    pub reason: String,
}

pub(crate) fn require_reason(reason: &str, what: &str) -> Result<String, crate::core::PipelineError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(crate::core::PipelineError::validation(format!(
            "{what} requires a reason"
        )));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn require_actor(by: &str) -> Result<String, crate::core::PipelineError> {
    let trimmed = by.trim();
    if trimmed.is_empty() {
        return Err(crate::core::PipelineError::validation(
            "reviewer id must not be empty",
        ));
    }
    Ok(trimmed.to_string())
}

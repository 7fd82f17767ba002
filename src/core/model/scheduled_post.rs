//! Scheduled delivery of one post to one platform.
//!
//! Status graph:
//!
//! ```text
//! Pending ──claim──▶ Processing ──▶ Published (terminal)
//!    │                   │
//!    │                   └──▶ Failed ──reset──▶ Pending
//!    ▼                          │
//! Cancelled ◀───────────────────┘
//! ```
//!
//! `reschedule` moves any non-published, non-processing record back to Pending
//! with a clean retry budget.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{require_reason, DomainEvent, Post, Transition};
use crate::core::{ExternalErrorKind, PipelineError};
use crate::util::{new_id, EntityId, Platform};

/// Default retry budget.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Status of a scheduled-post record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledPostStatus {
    /// Waiting for its time.
    Pending,
    /// Claimed by a worker; dispatch in flight.
    Processing,
    /// Delivered.
    Published,
    /// Last attempt failed.
    Failed,
    /// Withdrawn before dispatch.
    Cancelled,
    /// Stored by older writers for a re-send; claimable like Pending is not.
    Republishing,
    /// Stored by older writers for a queued retry.
    Retry,
}

impl ScheduledPostStatus {
    /// No further automatic transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Published | Self::Cancelled)
    }
}

impl fmt::Display for ScheduledPostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Republishing => "republishing",
            Self::Retry => "retry",
        };
        f.write_str(name)
    }
}

/// Fixed delay tiers between automatic retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before retry N (1-based) is `tiers[N - 1]`; the last tier repeats.
    pub tiers_secs: Vec<u64>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            tiers_secs: vec![30, 60, 300],
        }
    }
}

impl BackoffPolicy {
    /// Delay after the `attempt`-th failure, never shorter than a platform `retry_after` hint.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let idx = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        let tier = self
            .tiers_secs
            .get(idx)
            .or_else(|| self.tiers_secs.last())
            .copied()
            .unwrap_or(0);
        let base = Duration::from_secs(tier);
        retry_after.map_or(base, |hint| base.max(hint))
    }
}

/// A post queued for delivery to a platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPost {
    /// Identifier.
    pub id: EntityId,
    /// Post being delivered.
    pub post_id: EntityId,
    /// Parent project.
    pub project_id: EntityId,
    /// Credential owner.
    pub user_id: String,
    /// Target platform.
    pub platform: Platform,
    /// Due time.
    pub scheduled_time: DateTime<Utc>,
    /// IANA timezone the user picked; informational.
    pub timezone: String,
    /// Lifecycle state.
    pub status: ScheduledPostStatus,
    /// Failed attempts since the last reschedule.
    pub retry_count: u32,
    /// Start of the last dispatch attempt.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Earliest time the retry job may pick this record up again.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Last failure message.
    pub error_message: Option<String>,
    /// Last failure class.
    pub failure_reason: Option<ExternalErrorKind>,
    /// Platform identifier of the published post.
    pub external_post_id: Option<String>,
    /// Public URL of the published post.
    pub publish_url: Option<String>,
    /// Delivery time.
    pub published_at: Option<DateTime<Utc>>,
    /// Why the record was cancelled.
    pub cancel_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

impl ScheduledPost {
    /// Schedule `post` on `platform` at a future `time`.
    ///
    /// # Errors
    ///
    /// `Validation` when `time` is not strictly after `now` or the timezone is blank.
    pub fn new(
        post: &Post,
        platform: Platform,
        time: DateTime<Utc>,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition<Self>, PipelineError> {
        ensure_future(time, now)?;
        let timezone = timezone.trim();
        if timezone.is_empty() {
            return Err(PipelineError::validation("timezone must not be empty"));
        }
        Ok(Self::build(post, platform, time, timezone, now))
    }

    /// Record due immediately, used by publish-now.
    #[must_use]
    pub fn immediate(post: &Post, platform: Platform, now: DateTime<Utc>) -> Transition<Self> {
        Self::build(post, platform, now, "UTC", now)
    }

    fn build(
        post: &Post,
        platform: Platform,
        time: DateTime<Utc>,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Transition<Self> {
        let next = Self {
            id: new_id("sp"),
            post_id: post.id.clone(),
            project_id: post.project_id.clone(),
            user_id: post.user_id.clone(),
            platform,
            scheduled_time: time,
            timezone: timezone.to_string(),
            status: ScheduledPostStatus::Pending,
            retry_count: 0,
            last_attempt: None,
            next_attempt_at: None,
            error_message: None,
            failure_reason: None,
            external_post_id: None,
            publish_url: None,
            published_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        let event = next.event("scheduled_post.created", format!("{platform} at {time}"));
        Transition { next, event }
    }

    fn event(&self, kind: &str, description: String) -> DomainEvent {
        DomainEvent::new("scheduled_post", &self.id, kind, description).with_metadata(
            serde_json::json!({
                "post_id": self.post_id,
                "project_id": self.project_id,
                "platform": self.platform,
                "retry_count": self.retry_count,
            }),
        )
    }

    fn illegal(&self, op: &str) -> PipelineError {
        PipelineError::conflict(format!(
            "scheduled post {} cannot {op} from status {}",
            self.id, self.status
        ))
    }

    /// `status == Failed && retry_count < max_retries`.
    #[must_use]
    pub const fn can_retry(&self, max_retries: u32) -> bool {
        matches!(self.status, ScheduledPostStatus::Failed) && self.retry_count < max_retries
    }

    /// Failed, within budget, and failed for a reason the retry job picks up.
    #[must_use]
    pub fn awaits_retry(&self, max_retries: u32) -> bool {
        self.can_retry(max_retries)
            && self.failure_reason.is_none_or(ExternalErrorKind::is_retryable)
    }

    /// Whether the record still occupies its (post, platform) slot.
    ///
    /// A Failed record only does while it [awaits retry](Self::awaits_retry);
    /// Terminal and Unauthorized failures free the slot.
    #[must_use]
    pub fn is_active(&self, max_retries: u32) -> bool {
        match self.status {
            ScheduledPostStatus::Pending
            | ScheduledPostStatus::Processing
            | ScheduledPostStatus::Republishing
            | ScheduledPostStatus::Retry => true,
            ScheduledPostStatus::Failed => self.awaits_retry(max_retries),
            ScheduledPostStatus::Published | ScheduledPostStatus::Cancelled => false,
        }
    }

    /// Pending and due.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduledPostStatus::Pending && self.scheduled_time <= now
    }

    /// Eligible for the automatic retry job at `now`.
    #[must_use]
    pub fn is_retry_due(&self, now: DateTime<Utc>, max_retries: u32) -> bool {
        self.awaits_retry(max_retries) && self.next_attempt_at.is_none_or(|at| at <= now)
    }

    /// Claim: Pending → Processing.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless Pending.
    pub fn start_processing(&self, now: DateTime<Utc>) -> Result<Transition<Self>, PipelineError> {
        if self.status != ScheduledPostStatus::Pending {
            return Err(self.illegal("start processing"));
        }
        let mut next = self.clone();
        next.status = ScheduledPostStatus::Processing;
        next.last_attempt = Some(now);
        next.updated_at = now;
        let event = next.event("scheduled_post.processing", format!("attempt {}", self.retry_count + 1));
        Ok(Transition { next, event })
    }

    /// Processing → Published.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless Processing.
    pub fn mark_published(
        &self,
        external_id: &str,
        publish_url: Option<String>,
        published_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Transition<Self>, PipelineError> {
        if self.status != ScheduledPostStatus::Processing {
            return Err(self.illegal("mark published"));
        }
        let mut next = self.clone();
        next.status = ScheduledPostStatus::Published;
        next.external_post_id = Some(external_id.to_string());
        next.publish_url = publish_url;
        next.published_at = Some(published_at);
        next.next_attempt_at = None;
        next.error_message = None;
        next.failure_reason = None;
        next.updated_at = now;
        let event = next
            .event("scheduled_post.published", format!("published as {external_id}"))
            .with_metadata(serde_json::json!({
                "post_id": self.post_id,
                "platform": self.platform,
                "external_post_id": external_id,
                "publish_url": next.publish_url,
            }));
        Ok(Transition { next, event })
    }

    /// Processing → Failed; increments the retry count and sets the backoff gate.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless Processing.
    #[allow(clippy::too_many_arguments)]
    pub fn mark_failed(
        &self,
        error_message: &str,
        failure_reason: ExternalErrorKind,
        retry_after: Option<Duration>,
        backoff: &BackoffPolicy,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Transition<Self>, PipelineError> {
        if self.status != ScheduledPostStatus::Processing {
            return Err(self.illegal("mark failed"));
        }
        let mut next = self.clone();
        next.status = ScheduledPostStatus::Failed;
        next.retry_count = self.retry_count.saturating_add(1);
        next.error_message = Some(error_message.to_string());
        next.failure_reason = Some(failure_reason);
        next.next_attempt_at = if failure_reason.is_retryable() && next.retry_count < max_retries {
            let delay = backoff.delay_for(next.retry_count, retry_after);
            Some(now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX))
        } else {
            None
        };
        next.updated_at = now;
        let event = next.event(
            "scheduled_post.failed",
            format!("{failure_reason}: {error_message}"),
        );
        Ok(Transition { next, event })
    }

    /// Failed → Pending while retry budget remains. Keeps the retry count.
    ///
    /// # Errors
    ///
    /// `StateConflict` when not eligible.
    pub fn reset_for_retry(
        &self,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Transition<Self>, PipelineError> {
        if !self.can_retry(max_retries) {
            return Err(PipelineError::conflict(format!(
                "scheduled post {} is not eligible for retry (status {}, retries {}/{})",
                self.id, self.status, self.retry_count, max_retries
            )));
        }
        let mut next = self.clone();
        next.status = ScheduledPostStatus::Pending;
        next.next_attempt_at = None;
        next.updated_at = now;
        let event = next.event("scheduled_post.retry", format!("retry {} queued", self.retry_count + 1));
        Ok(Transition { next, event })
    }

    /// Withdraw the record before dispatch.
    ///
    /// # Errors
    ///
    /// `StateConflict` if Published, Processing or already Cancelled;
    /// `Validation` for an empty reason.
    pub fn cancel(&self, reason: &str, now: DateTime<Utc>) -> Result<Transition<Self>, PipelineError> {
        let reason = require_reason(reason, "cancelling a scheduled post")?;
        if matches!(
            self.status,
            ScheduledPostStatus::Published
                | ScheduledPostStatus::Processing
                | ScheduledPostStatus::Cancelled
        ) {
            return Err(self.illegal("cancel"));
        }
        let mut next = self.clone();
        next.status = ScheduledPostStatus::Cancelled;
        next.cancel_reason = Some(reason.clone());
        next.next_attempt_at = None;
        next.updated_at = now;
        let event = next.event("scheduled_post.cancelled", reason);
        Ok(Transition { next, event })
    }

    /// Move to a new future time with a fresh retry budget.
    ///
    /// # Errors
    ///
    /// `StateConflict` if Published or Processing; `Validation` for a past time.
    pub fn reschedule(
        &self,
        new_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Transition<Self>, PipelineError> {
        if matches!(
            self.status,
            ScheduledPostStatus::Published | ScheduledPostStatus::Processing
        ) {
            return Err(self.illegal("reschedule"));
        }
        ensure_future(new_time, now)?;
        let mut next = self.clone();
        next.status = ScheduledPostStatus::Pending;
        next.scheduled_time = new_time;
        next.retry_count = 0;
        next.error_message = None;
        next.failure_reason = None;
        next.next_attempt_at = None;
        next.cancel_reason = None;
        next.updated_at = now;
        let event = next.event("scheduled_post.rescheduled", format!("moved to {new_time}"));
        Ok(Transition { next, event })
    }
}

fn ensure_future(time: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), PipelineError> {
    if time <= now {
        return Err(PipelineError::validation(format!(
            "scheduled time {time} must be in the future"
        )));
    }
    Ok(())
}

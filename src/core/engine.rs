//! Scheduled-post lifecycle.
//!
//! The engine owns every write to [`ScheduledPost`] records. The claim
//! (`Pending → Processing`) is the single point of mutual exclusion between
//! workers: it is a compare-and-swap in the store, and exactly one caller
//! wins. All other writes are compare-and-swaps too, so a racing writer gets
//! a conflict instead of clobbering state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::activity::ActivityRecorder;
use super::approval::advance_project;
use super::model::{
    Post, PostStatus, ProjectAction, ProjectStage, ScheduledPost, ScheduledPostStatus,
};
use super::store::PipelineStore;
use super::{ExternalErrorKind, PipelineError};
use crate::config::EngineConfig;
use crate::util::{Platform, SharedClock};

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This caller owns the dispatch.
    Claimed(ScheduledPost),
    /// Another worker claimed the record first.
    AlreadyClaimed,
    /// The record is not claimable (cancelled, published, failed).
    NotClaimable(ScheduledPostStatus),
}

/// Scheduled-post engine.
#[derive(Clone)]
pub struct ScheduledPostEngine {
    store: Arc<dyn PipelineStore>,
    activity: ActivityRecorder,
    clock: SharedClock,
    config: EngineConfig,
}

impl ScheduledPostEngine {
    /// Create an engine over `store`.
    pub fn new(
        store: Arc<dyn PipelineStore>,
        activity: ActivityRecorder,
        clock: SharedClock,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            activity,
            clock,
            config,
        }
    }

    /// Engine settings.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fetch a record.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn get(&self, id: &str) -> Result<ScheduledPost, PipelineError> {
        self.store.get_scheduled(id)
    }

    fn commit(
        &self,
        current: &ScheduledPost,
        t: super::model::Transition<ScheduledPost>,
    ) -> Result<ScheduledPost, PipelineError> {
        self.store.update_scheduled(&t.next, current.status)?;
        self.activity.record_event(t.event);
        Ok(t.next)
    }

    /// Schedule an approved post on `platform` at `time`.
    ///
    /// # Errors
    ///
    /// - `Validation` for a past time or blank timezone
    /// - `StateConflict` if the post is not approved, is archived, already has
    ///   an active record for the platform, or another pending post of the same
    ///   account lands on the platform within the conflict window
    pub fn schedule(
        &self,
        post_id: &str,
        platform: Platform,
        time: DateTime<Utc>,
        timezone: &str,
    ) -> Result<ScheduledPost, PipelineError> {
        let now = self.clock.now();
        let post = self.store.get_post(post_id)?;
        ensure_schedulable(&post)?;
        let t = ScheduledPost::new(&post, platform, time, timezone, now)?;

        let max_retries = self.config.max_retries;
        let window = chrono::Duration::seconds(
            i64::try_from(self.config.conflict_window_secs).unwrap_or(i64::MAX),
        );
        let guard = |existing: &ScheduledPost| -> Result<(), PipelineError> {
            if existing.platform != platform {
                return Ok(());
            }
            if existing.post_id == post.id && existing.is_active(max_retries) {
                return Err(PipelineError::conflict(format!(
                    "post {} already has an active schedule on {platform} ({})",
                    post.id, existing.id
                )));
            }
            if existing.user_id == post.user_id
                && existing.status == ScheduledPostStatus::Pending
                && (existing.scheduled_time - time).abs() <= window
            {
                return Err(PipelineError::conflict(format!(
                    "{platform} already has post {} scheduled at {} within {} minutes",
                    existing.post_id,
                    existing.scheduled_time,
                    window.num_minutes()
                )));
            }
            Ok(())
        };
        self.store.insert_scheduled(t.next.clone(), &guard)?;
        self.activity.record_event(t.event);
        let record = t.next;

        if post.status == PostStatus::Approved {
            if let Err(e) = self.flip_post_to_scheduled(&post) {
                let reason = format!("post changed while scheduling: {e}");
                let undone = record
                    .cancel(&reason, self.clock.now())
                    .and_then(|undo| self.commit(&record, undo));
                if let Err(undo_err) = undone {
                    tracing::error!(
                        scheduled_post_id = %record.id,
                        post_id = %record.post_id,
                        error = %undo_err,
                        "orphaned pending record left after failed schedule"
                    );
                }
                return Err(e);
            }
        }
        self.advance_project_if(&record.project_id, ProjectStage::PostsApproved, ProjectAction::SchedulePosts);

        tracing::info!(
            scheduled_post_id = %record.id,
            post_id = %record.post_id,
            platform = %platform,
            scheduled_time = %record.scheduled_time,
            "post scheduled"
        );
        Ok(record)
    }

    /// Queue a post for immediate delivery on `platform`.
    ///
    /// A pending record for the same platform is brought forward to now.
    /// Future-time and conflict-window rules do not apply.
    ///
    /// # Errors
    ///
    /// `StateConflict` if the post is not approved or the platform already has a
    /// record that is in flight or awaiting retry.
    pub fn enqueue_immediate(
        &self,
        post_id: &str,
        platform: Platform,
    ) -> Result<ScheduledPost, PipelineError> {
        let now = self.clock.now();
        let post = self.store.get_post(post_id)?;
        ensure_schedulable(&post)?;

        let existing = self
            .store
            .scheduled_for_post(post_id)?
            .into_iter()
            .find(|r| r.platform == platform && r.is_active(self.config.max_retries));
        if let Some(pending) = existing.filter(|r| r.status == ScheduledPostStatus::Pending) {
            let mut next = pending.clone();
            next.scheduled_time = now;
            next.updated_at = now;
            self.store.update_scheduled(&next, pending.status)?;
            tracing::debug!(scheduled_post_id = %next.id, "pending schedule brought forward");
            return Ok(next);
        }

        let max_retries = self.config.max_retries;
        let t = ScheduledPost::immediate(&post, platform, now);
        let guard = |existing: &ScheduledPost| -> Result<(), PipelineError> {
            if existing.post_id == post.id
                && existing.platform == platform
                && existing.is_active(max_retries)
            {
                return Err(PipelineError::conflict(format!(
                    "post {} already has an active record on {platform} ({}, {})",
                    post.id, existing.id, existing.status
                )));
            }
            Ok(())
        };
        self.store.insert_scheduled(t.next.clone(), &guard)?;
        self.activity.record_event(t.event);
        Ok(t.next)
    }

    /// Move a record to a new time with a fresh retry budget.
    ///
    /// # Errors
    ///
    /// `StateConflict` if Published, Processing, or another active record
    /// already covers the platform; `Validation` for a past time.
    pub fn reschedule(&self, id: &str, new_time: DateTime<Utc>) -> Result<ScheduledPost, PipelineError> {
        let current = self.store.get_scheduled(id)?;
        let t = current.reschedule(new_time, self.clock.now())?;
        self.ensure_slot_free(&current)?;
        let record = self.commit(&current, t)?;
        let post = self.store.get_post(&record.post_id)?;
        if post.status == PostStatus::Approved {
            self.flip_post_to_scheduled(&post)?;
        }
        Ok(record)
    }

    /// Cancel a record that has not been dispatched.
    ///
    /// Reverts the post to Approved when no other active record remains.
    ///
    /// # Errors
    ///
    /// `StateConflict` if Published, Processing or already Cancelled;
    /// `Validation` for a blank reason.
    pub fn cancel(&self, id: &str, reason: &str) -> Result<ScheduledPost, PipelineError> {
        let current = self.store.get_scheduled(id)?;
        let t = current.cancel(reason, self.clock.now())?;
        let record = self.commit(&current, t)?;

        let others_active = self
            .store
            .scheduled_for_post(&record.post_id)?
            .iter()
            .any(|r| r.id != record.id && r.is_active(self.config.max_retries));
        if !others_active {
            let post = self.store.get_post(&record.post_id)?;
            if post.status == PostStatus::Scheduled {
                let t = post.unschedule(self.clock.now())?;
                self.store.update_post(&t.next, post.status)?;
                self.activity.record_event(t.event);
            }
        }
        tracing::info!(scheduled_post_id = %record.id, "scheduled post cancelled");
        Ok(record)
    }

    /// Claim a record for dispatch: atomic `Pending → Processing`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `Backend` for store failures. Losing the
    /// race is not an error.
    pub fn start_processing(&self, id: &str) -> Result<ClaimOutcome, PipelineError> {
        let current = self.store.get_scheduled(id)?;
        let t = match current.start_processing(self.clock.now()) {
            Ok(t) => t,
            Err(_) if current.status == ScheduledPostStatus::Processing => {
                return Ok(ClaimOutcome::AlreadyClaimed)
            }
            Err(_) => return Ok(ClaimOutcome::NotClaimable(current.status)),
        };
        match self.store.update_scheduled(&t.next, ScheduledPostStatus::Pending) {
            Ok(()) => {
                self.activity.record_event(t.event);
                tracing::debug!(scheduled_post_id = %id, "claimed");
                Ok(ClaimOutcome::Claimed(t.next))
            }
            Err(e) if e.is_conflict() => Ok(ClaimOutcome::AlreadyClaimed),
            Err(e) => Err(e),
        }
    }

    /// Record a successful delivery.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless the record is Processing.
    pub fn mark_published(
        &self,
        id: &str,
        external_id: &str,
        publish_url: Option<String>,
        published_at: DateTime<Utc>,
    ) -> Result<ScheduledPost, PipelineError> {
        let current = self.store.get_scheduled(id)?;
        let t = current.mark_published(external_id, publish_url, published_at, self.clock.now())?;
        self.commit(&current, t)
    }

    /// Record a failed delivery.
    ///
    /// # Errors
    ///
    /// `StateConflict` unless the record is Processing.
    pub fn mark_failed(
        &self,
        id: &str,
        error_message: &str,
        failure_reason: ExternalErrorKind,
        retry_after: Option<Duration>,
    ) -> Result<ScheduledPost, PipelineError> {
        let current = self.store.get_scheduled(id)?;
        let t = current.mark_failed(
            error_message,
            failure_reason,
            retry_after,
            &self.config.backoff,
            self.config.max_retries,
            self.clock.now(),
        )?;
        let record = self.commit(&current, t)?;
        tracing::warn!(
            scheduled_post_id = %id,
            reason = %failure_reason,
            retry_count = record.retry_count,
            next_attempt_at = ?record.next_attempt_at,
            "publish attempt failed"
        );
        Ok(record)
    }

    /// `status == Failed && retry_count < max_retries`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn can_retry(&self, id: &str) -> Result<bool, PipelineError> {
        Ok(self.store.get_scheduled(id)?.can_retry(self.config.max_retries))
    }

    /// Put a failed record back to Pending, keeping its retry count.
    ///
    /// # Errors
    ///
    /// `StateConflict` when the record is not eligible.
    pub fn reset_for_retry(&self, id: &str) -> Result<ScheduledPost, PipelineError> {
        let current = self.store.get_scheduled(id)?;
        let t = current.reset_for_retry(self.config.max_retries, self.clock.now())?;
        self.ensure_slot_free(&current)?;
        self.commit(&current, t)
    }

    fn ensure_slot_free(&self, current: &ScheduledPost) -> Result<(), PipelineError> {
        let clash = self
            .store
            .scheduled_for_post(&current.post_id)?
            .into_iter()
            .any(|r| {
                r.id != current.id
                    && r.platform == current.platform
                    && r.is_active(self.config.max_retries)
            });
        if clash {
            return Err(PipelineError::conflict(format!(
                "post {} already has another active schedule on {}",
                current.post_id, current.platform
            )));
        }
        Ok(())
    }

    /// Pending records due now, oldest first, at most `limit`.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn due_for_publishing(&self, limit: usize) -> Result<Vec<ScheduledPost>, PipelineError> {
        let now = self.clock.now();
        Ok(self
            .store
            .scheduled_by_status(ScheduledPostStatus::Pending)?
            .into_iter()
            .filter(|r| r.is_due(now))
            .take(limit)
            .collect())
    }

    /// Failed records whose backoff elapsed and whose failure is retryable.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn due_for_retry(&self, limit: usize) -> Result<Vec<ScheduledPost>, PipelineError> {
        let now = self.clock.now();
        Ok(self
            .store
            .scheduled_by_status(ScheduledPostStatus::Failed)?
            .into_iter()
            .filter(|r| r.is_retry_due(now, self.config.max_retries))
            .take(limit)
            .collect())
    }

    /// Fail Processing records whose claim is older than `older_than`.
    ///
    /// Returns how many were recovered.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn recover_stale_claims(&self, older_than: Duration) -> Result<usize, PipelineError> {
        let now = self.clock.now();
        let cutoff = now - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        let mut recovered = 0;
        for record in self.store.scheduled_by_status(ScheduledPostStatus::Processing)? {
            if record.last_attempt.is_some_and(|at| at >= cutoff) {
                continue;
            }
            match self.mark_failed(
                &record.id,
                "claim expired without a result",
                ExternalErrorKind::Transient,
                None,
            ) {
                Ok(_) => recovered += 1,
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        if recovered > 0 {
            tracing::warn!(recovered = recovered, "recovered stale claims");
        }
        Ok(recovered)
    }

    fn flip_post_to_scheduled(&self, post: &Post) -> Result<(), PipelineError> {
        let t = post.mark_as_scheduled(self.clock.now())?;
        self.store.update_post(&t.next, post.status)?;
        self.activity.record_event(t.event);
        Ok(())
    }

    fn advance_project_if(&self, project_id: &str, gate: ProjectStage, action: ProjectAction) {
        let outcome = self.store.get_project(project_id).and_then(|p| {
            if p.stage == gate {
                advance_project(self.store.as_ref(), &self.activity, &self.clock, project_id, action)
            } else {
                Ok(false)
            }
        });
        if let Err(e) = outcome {
            tracing::warn!(project_id = %project_id, error = %e, "project stage not advanced");
        }
    }
}

fn ensure_schedulable(post: &Post) -> Result<(), PipelineError> {
    if post.archived.is_some() {
        return Err(PipelineError::conflict(format!("post {} is archived", post.id)));
    }
    if !matches!(post.status, PostStatus::Approved | PostStatus::Scheduled) {
        return Err(PipelineError::conflict(format!(
            "post {} must be approved before scheduling (status {:?})",
            post.id, post.status
        )));
    }
    Ok(())
}

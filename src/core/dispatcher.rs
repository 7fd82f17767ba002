//! Publishing dispatch.
//!
//! Takes a claimed scheduled post to the external platform and feeds the
//! outcome back into the record, the post and the project. Errors from the
//! platform are classified once, here, and never escape as panics or raw
//! transport errors.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::activity::ActivityRecorder;
use super::adapt::{adapt_content, AdaptedContent};
use super::approval::advance_project;
use super::engine::{ClaimOutcome, ScheduledPostEngine};
use super::model::{PostStatus, ProjectAction, ProjectStage, ScheduledPost, ScheduledPostStatus};
use super::store::PipelineStore;
use super::{ExternalErrorKind, PipelineError};
use crate::config::DispatcherConfig;
use crate::util::{Platform, SharedClock};

/// Access credential for one user on one platform.
#[derive(Clone)]
pub struct Credential {
    /// Credential owner.
    pub user_id: String,
    /// Platform.
    pub platform: Platform,
    /// Bearer token.
    pub access_token: SecretString,
    /// Expiry, if the platform reports one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("platform", &self.platform)
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Successful platform response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Platform identifier of the created post.
    pub external_id: String,
    /// Public URL, when the platform returns one.
    pub url: Option<String>,
    /// Platform-reported publish time.
    pub published_at: Option<DateTime<Utc>>,
}

/// Classified platform failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PublishError {
    /// Failure class.
    pub kind: ExternalErrorKind,
    /// Detail.
    pub message: String,
    /// Platform hint for when to try again.
    pub retry_after: Option<Duration>,
}

impl PublishError {
    /// Build an error of `kind`.
    pub fn new(kind: ExternalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attach a retry hint.
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

impl From<PublishError> for PipelineError {
    fn from(e: PublishError) -> Self {
        Self::ExternalApi {
            kind: e.kind,
            message: e.message,
        }
    }
}

/// Publishes content to one platform.
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    /// Platform served.
    fn platform(&self) -> Platform;

    /// Publish `content` with `credential`.
    async fn publish(
        &self,
        content: &AdaptedContent,
        credential: &Credential,
    ) -> Result<PublishReceipt, PublishError>;
}

/// Source of valid credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A non-expired credential for `user_id` on `platform`.
    ///
    /// A missing or expired credential is `Unauthorized`.
    async fn get_valid_credential(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Credential, PublishError>;
}

/// Publishers keyed by platform.
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<Platform, Arc<dyn PlatformPublisher>>,
}

impl PublisherRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher, replacing any previous one for the platform.
    #[must_use]
    pub fn with(mut self, publisher: Arc<dyn PlatformPublisher>) -> Self {
        self.publishers.insert(publisher.platform(), publisher);
        self
    }

    /// Publisher for `platform`.
    #[must_use]
    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformPublisher>> {
        self.publishers.get(&platform).cloned()
    }

    /// Registered platforms.
    #[must_use]
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<_> = self.publishers.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

/// What happened to one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Delivered.
    Published {
        /// Record that was delivered.
        scheduled_post_id: String,
        /// Platform identifier.
        external_id: String,
        /// Public URL.
        url: Option<String>,
        /// Adaptation warnings.
        warnings: Vec<String>,
    },
    /// Delivery failed.
    Failed {
        /// Record that failed, when one exists.
        scheduled_post_id: Option<String>,
        /// Failure class.
        kind: ExternalErrorKind,
        /// Detail.
        message: String,
        /// Whether the retry job will pick the record up again.
        will_retry: bool,
    },
    /// Nothing was sent.
    Skipped {
        /// Record concerned.
        scheduled_post_id: String,
        /// Why.
        reason: String,
    },
}

impl DispatchOutcome {
    /// Whether the content reached the platform.
    #[must_use]
    pub const fn is_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

/// Sends scheduled posts to their platforms.
#[derive(Clone)]
pub struct PublishingDispatcher {
    store: Arc<dyn PipelineStore>,
    engine: ScheduledPostEngine,
    activity: ActivityRecorder,
    clock: SharedClock,
    credentials: Arc<dyn CredentialProvider>,
    publishers: PublisherRegistry,
    config: DispatcherConfig,
}

const CAS_ATTEMPTS: usize = 3;

impl PublishingDispatcher {
    /// Create a dispatcher.
    pub fn new(
        store: Arc<dyn PipelineStore>,
        engine: ScheduledPostEngine,
        activity: ActivityRecorder,
        clock: SharedClock,
        credentials: Arc<dyn CredentialProvider>,
        publishers: PublisherRegistry,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            engine,
            activity,
            clock,
            credentials,
            publishers,
            config,
        }
    }

    /// Engine used for record writes.
    #[must_use]
    pub const fn engine(&self) -> &ScheduledPostEngine {
        &self.engine
    }

    /// Claim and dispatch one scheduled post.
    ///
    /// Losing the claim yields [`DispatchOutcome::Skipped`].
    ///
    /// # Errors
    ///
    /// Only store failures; platform failures are outcomes.
    pub async fn dispatch_scheduled(&self, id: &str) -> Result<DispatchOutcome, PipelineError> {
        match self.engine.start_processing(id)? {
            ClaimOutcome::Claimed(record) => self.execute_claimed(record).await,
            ClaimOutcome::AlreadyClaimed => Ok(DispatchOutcome::Skipped {
                scheduled_post_id: id.to_string(),
                reason: "already claimed by another worker".into(),
            }),
            ClaimOutcome::NotClaimable(status) => Ok(DispatchOutcome::Skipped {
                scheduled_post_id: id.to_string(),
                reason: format!("not claimable from {status}"),
            }),
        }
    }

    /// Publish a post to several platforms now.
    ///
    /// Each platform is handled independently and concurrently; one failure
    /// never stops the others. Every platform's record exists before the
    /// first call goes out, so a failure that settles early still sees its
    /// siblings as pending.
    pub async fn dispatch_post(
        &self,
        post_id: &str,
        platforms: &[Platform],
    ) -> BTreeMap<Platform, DispatchOutcome> {
        let mut outcomes = BTreeMap::new();
        let mut queued = Vec::with_capacity(platforms.len());
        for &platform in platforms {
            match self.engine.enqueue_immediate(post_id, platform) {
                Ok(record) => queued.push((platform, record.id)),
                Err(e) => {
                    outcomes.insert(platform, failed_outcome(None, &e));
                }
            }
        }

        let attempts = queued.into_iter().map(|(platform, id)| async move {
            let outcome = self
                .dispatch_scheduled(&id)
                .await
                .unwrap_or_else(|e| failed_outcome(Some(id), &e));
            (platform, outcome)
        });
        outcomes.extend(join_all(attempts).await);
        outcomes
    }

    async fn execute_claimed(&self, record: ScheduledPost) -> Result<DispatchOutcome, PipelineError> {
        tracing::debug!(
            scheduled_post_id = %record.id,
            platform = %record.platform,
            attempt = record.retry_count + 1,
            "dispatching"
        );
        match self.attempt(&record).await {
            Ok((receipt, warnings)) => self.record_success(&record, receipt, warnings),
            Err(err) => self.record_failure(&record, &err),
        }
    }

    async fn attempt(
        &self,
        record: &ScheduledPost,
    ) -> Result<(PublishReceipt, Vec<String>), PublishError> {
        let post = self
            .store
            .get_post(&record.post_id)
            .map_err(|e| PublishError::new(ExternalErrorKind::Terminal, e.to_string()))?;
        let adapted = adapt_content(&post.content, record.platform)
            .map_err(|e| PublishError::new(ExternalErrorKind::Terminal, e.to_string()))?;
        let publisher = self.publishers.get(record.platform).ok_or_else(|| {
            PublishError::new(
                ExternalErrorKind::Terminal,
                format!("no publisher registered for {}", record.platform),
            )
        })?;
        let credential = self
            .credentials
            .get_valid_credential(&record.user_id, record.platform)
            .await?;

        let timeout = Duration::from_secs(self.config.call_timeout_secs);
        let receipt = tokio::time::timeout(timeout, publisher.publish(&adapted, &credential))
            .await
            .map_err(|_| {
                PublishError::new(
                    ExternalErrorKind::Transient,
                    format!("{} did not answer within {timeout:?}", record.platform),
                )
            })??;
        Ok((receipt, adapted.warnings))
    }

    fn record_success(
        &self,
        record: &ScheduledPost,
        receipt: PublishReceipt,
        warnings: Vec<String>,
    ) -> Result<DispatchOutcome, PipelineError> {
        let published_at = receipt.published_at.unwrap_or_else(|| self.clock.now());
        let record = self
            .engine
            .mark_published(&record.id, &receipt.external_id, receipt.url.clone(), published_at)
            .inspect_err(|e| {
                tracing::error!(
                    scheduled_post_id = %record.id,
                    platform = %record.platform,
                    external_id = %receipt.external_id,
                    error = %e,
                    "delivered but the record could not be marked published"
                );
            })?;
        tracing::info!(
            scheduled_post_id = %record.id,
            platform = %record.platform,
            external_id = %receipt.external_id,
            "published"
        );

        self.retry_on_conflict(|| {
            let post = self.store.get_post(&record.post_id)?;
            if post.status == PostStatus::Published {
                return Ok(());
            }
            let t = post.mark_as_published(published_at, self.clock.now())?;
            self.store.update_post(&t.next, post.status)?;
            self.activity.record_event(t.event);
            Ok(())
        })?;

        self.advance_on_success(&record.project_id);
        Ok(DispatchOutcome::Published {
            scheduled_post_id: record.id,
            external_id: receipt.external_id,
            url: receipt.url,
            warnings,
        })
    }

    fn record_failure(
        &self,
        record: &ScheduledPost,
        err: &PublishError,
    ) -> Result<DispatchOutcome, PipelineError> {
        let record = self
            .engine
            .mark_failed(&record.id, &err.message, err.kind, err.retry_after)?;
        let will_retry = err.kind.is_retryable() && record.can_retry(self.engine.config().max_retries);
        if !will_retry {
            self.on_final_failure(&record, &err.message)?;
        }
        Ok(DispatchOutcome::Failed {
            scheduled_post_id: Some(record.id),
            kind: err.kind,
            message: err.message.clone(),
            will_retry,
        })
    }

    fn on_final_failure(&self, record: &ScheduledPost, message: &str) -> Result<(), PipelineError> {
        let max_retries = self.engine.config().max_retries;
        let siblings = self.store.scheduled_for_post(&record.post_id)?;
        let delivered_elsewhere = siblings
            .iter()
            .any(|r| r.status == ScheduledPostStatus::Published);
        let still_pending = siblings
            .iter()
            .any(|r| r.id != record.id && r.is_active(max_retries));

        if !delivered_elsewhere && !still_pending {
            self.retry_on_conflict(|| {
                let post = self.store.get_post(&record.post_id)?;
                if !matches!(post.status, PostStatus::Approved | PostStatus::Scheduled) {
                    return Ok(());
                }
                let t = post.mark_as_failed(message, self.clock.now())?;
                self.store.update_post(&t.next, post.status)?;
                self.activity.record_event(t.event);
                Ok(())
            })?;
        }

        let project = self.store.get_project(&record.project_id)?;
        if project.stage == ProjectStage::Publishing {
            let any_published = self
                .store
                .posts_for_project(&record.project_id)?
                .iter()
                .any(|p| p.status == PostStatus::Published);
            if !any_published {
                self.try_advance(&record.project_id, ProjectAction::FailPublishing);
            }
        }
        Ok(())
    }

    fn advance_on_success(&self, project_id: &str) {
        let Ok(project) = self.store.get_project(project_id) else {
            return;
        };
        if matches!(project.stage, ProjectStage::PostsApproved | ProjectStage::Scheduled) {
            self.try_advance(project_id, ProjectAction::StartPublishing);
        }
        let all_published = self.store.posts_for_project(project_id).map(|posts| {
            let live: Vec<_> = posts.iter().filter(|p| p.is_live()).collect();
            !live.is_empty() && live.iter().all(|p| p.status == PostStatus::Published)
        });
        if matches!(all_published, Ok(true)) {
            self.try_advance(project_id, ProjectAction::CompletePublishing);
        }
    }

    /// Move the project into Publishing ahead of a publish-now batch.
    pub fn start_publishing(&self, project_id: &str) {
        self.try_advance(project_id, ProjectAction::StartPublishing);
    }

    fn try_advance(&self, project_id: &str, action: ProjectAction) {
        let outcome = self.retry_on_conflict(|| {
            advance_project(self.store.as_ref(), &self.activity, &self.clock, project_id, action)
        });
        if let Err(e) = outcome {
            tracing::warn!(project_id = %project_id, action = ?action, error = %e, "project stage not advanced");
        }
    }

    fn retry_on_conflict<T>(
        &self,
        mut op: impl FnMut() -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_conflict() && attempt < CAS_ATTEMPTS => attempt += 1,
                other => return other,
            }
        }
    }
}

fn failed_outcome(scheduled_post_id: Option<String>, err: &PipelineError) -> DispatchOutcome {
    let kind = match err {
        PipelineError::ExternalApi { kind, .. } => *kind,
        _ => ExternalErrorKind::Terminal,
    };
    DispatchOutcome::Failed {
        scheduled_post_id,
        kind,
        message: err.to_string(),
        will_retry: false,
    }
}

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use content_pipeline::config::{DispatcherConfig, EngineConfig};
use content_pipeline::core::model::{ContentProject, Post, PostStatus, ProjectStage};
use content_pipeline::core::{
    ActivityRecorder, AdaptedContent, ApprovalWorkflow, Credential, CredentialProvider,
    ExternalErrorKind, InMemoryActivitySink, PipelineStore, PlatformPublisher, PublishError,
    PublishReceipt, PublisherRegistry, PublishingDispatcher, ScheduledPostEngine,
};
use content_pipeline::infra::InMemoryPipelineStore;
use content_pipeline::util::{ManualClock, Platform, SharedClock};
use parking_lot::Mutex;
use secrecy::SecretString;

pub const USER: &str = "user-1";

// ============================================================================
// FIXTURE
// ============================================================================

/// In-memory store, manual clock and recording activity sink.
pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryPipelineStore>,
    pub sink: Arc<InMemoryActivitySink>,
    pub activity: ActivityRecorder,
    pub engine: ScheduledPostEngine,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryPipelineStore::new());
        let sink = Arc::new(InMemoryActivitySink::new(1_000));
        let shared: SharedClock = clock.clone();
        let activity = ActivityRecorder::new(sink.clone(), Arc::clone(&shared));
        let engine = ScheduledPostEngine::new(store.clone(), activity.clone(), shared, config);
        Self {
            clock,
            store,
            sink,
            activity,
            engine,
        }
    }

    pub fn shared_clock(&self) -> SharedClock {
        self.clock.clone()
    }

    pub fn dyn_store(&self) -> Arc<dyn PipelineStore> {
        self.store.clone()
    }

    pub fn approval(&self) -> ApprovalWorkflow {
        ApprovalWorkflow::new(self.dyn_store(), self.activity.clone(), self.shared_clock())
    }

    pub fn dispatcher(
        &self,
        publishers: PublisherRegistry,
        credentials: Arc<dyn CredentialProvider>,
        config: DispatcherConfig,
    ) -> PublishingDispatcher {
        PublishingDispatcher::new(
            self.dyn_store(),
            self.engine.clone(),
            self.activity.clone(),
            self.shared_clock(),
            credentials,
            publishers,
            config,
        )
    }

    /// Insert a project sitting at `stage`.
    pub fn project_at(&self, stage: ProjectStage) -> ContentProject {
        use content_pipeline::util::Clock;
        let mut project = ContentProject::new(USER, "Quarterly webinar", self.clock.now());
        project.stage = stage;
        self.store.insert_project(project.clone()).unwrap();
        project
    }

    /// Insert an approved post in `project`.
    pub fn approved_post(&self, project: &ContentProject, platform: Platform) -> Post {
        self.post_with(project, platform, "Shipping beats polishing. #product")
    }

    pub fn post_with(&self, project: &ContentProject, platform: Platform, content: &str) -> Post {
        use content_pipeline::util::Clock;
        let mut post = Post::new(
            &project.id,
            "insight-1",
            &project.user_id,
            platform,
            content,
            self.clock.now(),
        );
        post.status = PostStatus::Approved;
        self.store.insert_post(post.clone()).unwrap();
        post
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.clock.advance(by);
    }
}

// ============================================================================
// TEST PUBLISHERS
// ============================================================================

/// Publisher answering from a script; succeeds once the script runs out.
pub struct ScriptedPublisher {
    platform: Platform,
    script: Mutex<VecDeque<Result<PublishReceipt, PublishError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

impl ScriptedPublisher {
    pub fn ok(platform: Platform) -> Arc<Self> {
        Self::scripted(platform, Vec::new())
    }

    pub fn scripted(
        platform: Platform,
        script: Vec<Result<PublishReceipt, PublishError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            platform,
            script: Mutex::new(script.into()),
            delay: None,
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(platform: Platform, kind: ExternalErrorKind, times: usize) -> Arc<Self> {
        let script = (0..times)
            .map(|_| Err(PublishError::new(kind, format!("{platform} said no"))))
            .collect();
        Self::scripted(platform, script)
    }

    pub fn slow(platform: Platform, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            platform,
            script: Mutex::new(VecDeque::new()),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl PlatformPublisher for ScriptedPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(
        &self,
        content: &AdaptedContent,
        _credential: &Credential,
    ) -> Result<PublishReceipt, PublishError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().push(content.text.clone());
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(PublishReceipt {
                external_id: format!("{}-{n}", self.platform),
                url: Some(format!("https://{}.example/p/{n}", self.platform)),
                published_at: None,
            })
        })
    }
}

/// Credentials for every platform except the revoked ones.
#[derive(Default)]
pub struct StaticCredentials {
    revoked: HashSet<Platform>,
}

impl StaticCredentials {
    pub fn all() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn revoked(platforms: &[Platform]) -> Arc<Self> {
        Arc::new(Self {
            revoked: platforms.iter().copied().collect(),
        })
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_valid_credential(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Credential, PublishError> {
        if self.revoked.contains(&platform) {
            return Err(PublishError::new(
                ExternalErrorKind::Unauthorized,
                format!("{platform} access revoked"),
            ));
        }
        Ok(Credential {
            user_id: user_id.to_string(),
            platform,
            access_token: SecretString::from("test-token".to_string()),
            expires_at: None,
        })
    }
}

pub fn registry(publishers: &[Arc<ScriptedPublisher>]) -> PublisherRegistry {
    publishers
        .iter()
        .fold(PublisherRegistry::new(), |registry, publisher| {
            registry.with(publisher.clone())
        })
}

//! Wires the pipeline components from configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::core::activity::{ActivityRecorder, ActivitySink, TracingActivitySink};
use crate::core::approval::ApprovalWorkflow;
use crate::core::dispatcher::{
    CredentialProvider, PlatformPublisher, PublisherRegistry, PublishingDispatcher,
};
use crate::core::engine::ScheduledPostEngine;
use crate::core::executor::{PipelineExecutor, Spawn};
use crate::core::jobs::{
    canonical_jobs, AnalyticsHandler, CleanupHandler, HealthCheckHandler, HealthMonitor,
    JobHandler, JobScheduler, JobSpec, MonitorHandle, PublishDuePostsHandler,
    RetryFailedPostsHandler, Scheduler, ShutdownReport,
};
use crate::core::model::JobType;
use crate::core::store::PipelineStore;
use crate::core::worker_pool::WorkerPool;
use crate::core::{AppResult, PipelinePool};
use crate::infra::credentials::{InMemoryTokenStore, TokenCredentialProvider, TokenStore};
use crate::infra::store::InMemoryPipelineStore;
use crate::runtime::api::PipelineService;
use crate::util::{system_clock, SharedClock};

/// Builder for a [`Pipeline`].
///
/// Every collaborator has an in-process default: the in-memory store, a
/// tracing activity sink, the system clock, and token-backed credentials over
/// an in-memory token store.
pub struct PipelineBuilder {
    config: PipelineConfig,
    store: Option<Arc<dyn PipelineStore>>,
    activity: Option<Arc<dyn ActivitySink>>,
    clock: Option<SharedClock>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    tokens: Option<Arc<dyn TokenStore>>,
    publishers: PublisherRegistry,
}

impl PipelineBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            store: None,
            activity: None,
            clock: None,
            credentials: None,
            tokens: None,
            publishers: PublisherRegistry::new(),
        }
    }

    /// Use `store` for persistence.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn PipelineStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Send activity to `sink`.
    #[must_use]
    pub fn with_activity_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.activity = Some(sink);
        self
    }

    /// Read time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Resolve credentials with `provider`.
    #[must_use]
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Back the default credential provider with `tokens`.
    #[must_use]
    pub fn with_token_store(mut self, tokens: Arc<dyn TokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Register a platform publisher.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn PlatformPublisher>) -> Self {
        self.publishers = self.publishers.with(publisher);
        self
    }

    /// Validate the configuration and assemble the components.
    ///
    /// Spawns the worker threads; recurring jobs start with [`Pipeline::start`].
    ///
    /// # Errors
    ///
    /// Invalid configuration or a worker pool that cannot start.
    pub fn build(self) -> AppResult<Pipeline> {
        self.config
            .validate()
            .map_err(|e| anyhow::anyhow!("config invalid: {e}"))?;

        let clock = self.clock.unwrap_or_else(system_clock);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryPipelineStore::new()));
        let sink = self
            .activity
            .unwrap_or_else(|| Arc::new(TracingActivitySink));
        let activity = ActivityRecorder::new(sink, Arc::clone(&clock));
        let credentials = self.credentials.unwrap_or_else(|| {
            let tokens = self
                .tokens
                .unwrap_or_else(|| Arc::new(InMemoryTokenStore::new()));
            Arc::new(TokenCredentialProvider::new(
                tokens,
                Arc::clone(&clock),
                Duration::from_secs(self.config.dispatcher.credential_cache_ttl_secs),
            ))
        });
        if self.publishers.platforms().is_empty() {
            tracing::warn!("no platform publishers registered; every dispatch will fail");
        }

        let approval = ApprovalWorkflow::new(Arc::clone(&store), activity.clone(), Arc::clone(&clock));
        let engine = ScheduledPostEngine::new(
            Arc::clone(&store),
            activity.clone(),
            Arc::clone(&clock),
            self.config.engine.clone(),
        );
        let dispatcher = PublishingDispatcher::new(
            Arc::clone(&store),
            engine.clone(),
            activity.clone(),
            Arc::clone(&clock),
            credentials,
            self.publishers,
            self.config.dispatcher.clone(),
        );
        let executor = PipelineExecutor::new(
            dispatcher.clone(),
            Arc::clone(&store),
            activity.clone(),
            Arc::clone(&clock),
        );
        let pool = Arc::new(WorkerPool::new(self.config.worker_pool.clone(), executor)?);

        Ok(Pipeline {
            config: self.config,
            store,
            activity,
            clock,
            approval,
            engine,
            dispatcher,
            pool,
        })
    }
}

/// Assembled pipeline components.
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn PipelineStore>,
    activity: ActivityRecorder,
    clock: SharedClock,
    approval: ApprovalWorkflow,
    engine: ScheduledPostEngine,
    dispatcher: PublishingDispatcher,
    pool: Arc<PipelinePool>,
}

impl Pipeline {
    /// Configuration the pipeline was built with.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Persistence.
    #[must_use]
    pub fn store(&self) -> Arc<dyn PipelineStore> {
        Arc::clone(&self.store)
    }

    /// Review operations.
    #[must_use]
    pub const fn approval(&self) -> &ApprovalWorkflow {
        &self.approval
    }

    /// Scheduled-post engine.
    #[must_use]
    pub const fn engine(&self) -> &ScheduledPostEngine {
        &self.engine
    }

    /// Publishing dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &PublishingDispatcher {
        &self.dispatcher
    }

    /// Worker pool.
    #[must_use]
    pub fn pool(&self) -> Arc<PipelinePool> {
        Arc::clone(&self.pool)
    }

    /// Operations facade.
    #[must_use]
    pub fn service(&self) -> PipelineService {
        PipelineService::new(
            Arc::clone(&self.store),
            self.approval.clone(),
            self.dispatcher.clone(),
            Arc::clone(&self.pool),
        )
    }

    fn handler_for(&self, spec: &JobSpec) -> AppResult<Arc<dyn JobHandler>> {
        let result_timeout = Duration::from_secs(self.config.jobs.result_timeout_secs);
        let handler: Arc<dyn JobHandler> = match spec.job_type {
            JobType::PublishDuePosts => Arc::new(PublishDuePostsHandler::new(
                self.engine.clone(),
                Arc::clone(&self.pool),
                result_timeout,
            )),
            JobType::RetryFailedPosts => Arc::new(RetryFailedPostsHandler::new(
                self.engine.clone(),
                Arc::clone(&self.pool),
                result_timeout,
            )),
            JobType::Cleanup => Arc::new(CleanupHandler::new(
                Arc::clone(&self.store),
                Arc::clone(&self.clock),
                Duration::from_secs(self.config.jobs.job_retention_secs),
            )),
            JobType::Analytics => Arc::new(AnalyticsHandler::new(
                Arc::clone(&self.store),
                Arc::clone(&self.clock),
            )),
            JobType::HealthCheck => Arc::new(HealthCheckHandler::new(self.engine.clone())),
            JobType::ContentStage => {
                anyhow::bail!("job `{}`: content-stage work is queued on demand", spec.id)
            }
        };
        Ok(handler)
    }

    /// Register the canonical jobs and start the health monitor on `spawner`.
    ///
    /// # Errors
    ///
    /// A job that cannot be registered.
    pub fn start<S>(&self, spawner: S) -> AppResult<RunningPipeline<S>>
    where
        S: Spawn + Send + Sync + 'static,
    {
        let scheduler = Arc::new(JobScheduler::new(
            Arc::clone(&self.store),
            self.activity.clone(),
            Arc::clone(&self.clock),
            spawner,
        ));
        for spec in canonical_jobs(&self.config.jobs) {
            let handler = self.handler_for(&spec)?;
            scheduler.register(spec, handler)?;
        }

        let monitor = Arc::new(
            HealthMonitor::new(
                Arc::clone(&scheduler) as Arc<dyn Scheduler>,
                Arc::clone(&self.store),
                self.activity.clone(),
                Arc::clone(&self.clock),
                self.config.health.clone(),
            )
            .with_backlog_probe(Arc::clone(&self.pool) as _),
        );
        let monitor = monitor.start(scheduler.spawner());
        tracing::info!("pipeline started");

        Ok(RunningPipeline {
            scheduler,
            monitor,
            pool: Arc::clone(&self.pool),
            drain_timeout: Duration::from_secs(self.config.health.drain_timeout_secs),
        })
    }
}

/// A pipeline whose jobs are running.
pub struct RunningPipeline<S> {
    scheduler: Arc<JobScheduler<S>>,
    monitor: MonitorHandle,
    pool: Arc<PipelinePool>,
    drain_timeout: Duration,
}

impl<S> RunningPipeline<S>
where
    S: Spawn + Send + Sync + 'static,
{
    /// The job scheduler, for on-demand triggers.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<JobScheduler<S>> {
        &self.scheduler
    }

    /// Stop the monitor and job loops, drain critical jobs, then stop the workers.
    pub async fn shutdown(self) -> ShutdownReport {
        self.monitor.stop();
        let report = self.scheduler.shutdown(self.drain_timeout).await;
        let pool = self.pool;
        if let Err(e) = tokio::task::spawn_blocking(move || pool.shutdown()).await {
            tracing::error!(error = %e, "worker pool shutdown panicked");
        }
        report
    }
}

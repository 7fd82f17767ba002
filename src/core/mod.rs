//! Core pipeline state machines, scheduling and publishing.

pub mod activity;
pub mod adapt;
pub mod approval;
pub mod batch;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod model;
pub mod store;
pub mod worker_pool;

pub use activity::{
    build_activity_event, ActivityEvent, ActivityRecorder, ActivitySink, InMemoryActivitySink,
    TracingActivitySink,
};
pub use adapt::{adapt_content, adapt_with, AdaptedContent, PlatformRules};
pub use approval::ApprovalWorkflow;
pub use batch::{BatchFailure, BatchReport};
pub use dispatcher::{
    Credential, CredentialProvider, DispatchOutcome, PlatformPublisher, PublishError,
    PublishReceipt, PublisherRegistry, PublishingDispatcher,
};
pub use engine::{ClaimOutcome, ScheduledPostEngine};
pub use error::{AppResult, ExternalErrorKind, PipelineError};
pub use executor::{PipelineExecutor, PipelineTask, Spawn, TaskMetadata, TaskOutcome, WorkerExecutor};
pub use store::{InsertGuard, PipelineStore};
pub use worker_pool::{PoolError, PoolStats, TaskKey, WorkerPool};

/// The worker pool the pipeline runs on.
pub type PipelinePool = WorkerPool<PipelineTask, TaskOutcome, PipelineExecutor>;

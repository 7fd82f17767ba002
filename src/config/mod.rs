//! Configuration models for the engine, jobs, health monitor, and worker pool.

pub mod pipeline;
pub mod worker_pool;

pub use pipeline::{
    DispatcherConfig, EngineConfig, HealthConfig, JobsConfig, PipelineConfig,
    STALE_CLAIM_MARGIN_SECS,
};
pub use worker_pool::WorkerPoolConfig;

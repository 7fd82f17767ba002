//! # Content Pipeline
//!
//! State machine and scheduled publishing engine for a content-repurposing
//! pipeline: projects move from raw content through insights and posts to
//! delivery on social platforms.
//!
//! ## Core Problem Solved
//!
//! Publishing to several platforms on a schedule has failure modes a simple
//! cron loop gets wrong:
//!
//! - **Double delivery**: two workers must never publish the same record. The
//!   claim is a compare-and-swap in the store, so exactly one wins.
//! - **Flaky platforms**: rate limits and transient errors are retried with
//!   backoff tiers; authorization and malformed-content errors are not.
//! - **Partial success**: a post delivered to one platform is published even
//!   if another platform rejects it.
//! - **Silent stalls**: a health monitor restarts recurring jobs that stop
//!   running and retriggers critical jobs that failed.
//!
//! ## Components
//!
//! - [`core::model`]: pure transition functions for projects, insights,
//!   posts, scheduled posts and job records
//! - [`core::approval::ApprovalWorkflow`]: review actions and the stage
//!   advances they unlock
//! - [`core::engine::ScheduledPostEngine`]: the scheduled-post lifecycle
//! - [`core::dispatcher::PublishingDispatcher`]: content adaptation, platform
//!   calls, error classification and multi-platform fan-out
//! - [`core::jobs`]: the recurring job scheduler and its health monitor
//! - [`core::worker_pool::WorkerPool`]: OS worker threads pulling from a
//!   `critical` and a `default` queue
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use content_pipeline::builders::PipelineBuilder;
//! use content_pipeline::config::PipelineConfig;
//! use content_pipeline::infra::HttpPublisher;
//! use content_pipeline::runtime::TokioSpawner;
//! use content_pipeline::util::Platform;
//!
//! let pipeline = PipelineBuilder::new(PipelineConfig::from_env()?)
//!     .with_publisher(Arc::new(HttpPublisher::new(Platform::LinkedIn, linkedin_url)))
//!     .build()?;
//! let running = pipeline.start(TokioSpawner::current())?;
//!
//! let service = pipeline.service();
//! service.schedule_batch(&project_id, &items)?;
//!
//! running.shutdown().await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Configuration models for the engine, jobs, health monitor, and worker pool.
pub mod config;
/// Pipeline state machines, scheduling, publishing and jobs.
pub mod core;
/// Builders that assemble the pipeline from configuration.
pub mod builders;
/// Infrastructure adapters for storage, credentials, and platform publishing.
pub mod infra;
/// Runtime adapters and the operations facade.
pub mod runtime;
/// Shared utilities.
pub mod util;

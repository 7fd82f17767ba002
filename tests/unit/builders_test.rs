//! Tests for builder modules

use content_pipeline::builders::PipelineBuilder;
use content_pipeline::config::{PipelineConfig, WorkerPoolConfig};
use content_pipeline::core::PipelineStore;
use content_pipeline::util::QueueLane;

fn small() -> PipelineConfig {
    PipelineConfig {
        worker_pool: WorkerPoolConfig::new().with_worker_count(1),
        ..PipelineConfig::default()
    }
}

#[test]
fn test_pipeline_builder_defaults() {
    let pipeline = PipelineBuilder::new(small()).build().unwrap();
    assert_eq!(pipeline.config().engine.max_retries, 3);
    assert_eq!(pipeline.engine().config().conflict_window_secs, 1800);
    assert_eq!(pipeline.pool().stats().worker_count, 1);
    assert_eq!(pipeline.pool().in_flight(QueueLane::Critical), 0);
    assert!(pipeline.store().list_projects().unwrap().is_empty());
    pipeline.pool().shutdown();
}

#[test]
fn test_pipeline_builder_rejects_invalid_config() {
    let mut cfg = small();
    cfg.engine.batch_limit = 0;
    let err = PipelineBuilder::new(cfg).build().err().unwrap();
    assert!(err.to_string().contains("batch_limit"));
}

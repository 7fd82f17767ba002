//! Tests for configuration validation

use content_pipeline::config::{PipelineConfig, WorkerPoolConfig, STALE_CLAIM_MARGIN_SECS};

#[test]
fn test_default_config_is_valid() {
    assert!(PipelineConfig::default().validate().is_ok());
}

#[test]
fn test_empty_backoff_rejected() {
    let mut cfg = PipelineConfig::default();
    cfg.engine.backoff.tiers_secs.clear();
    assert!(cfg.validate().unwrap_err().contains("tiers_secs"));
}

#[test]
fn test_zero_job_interval_rejected() {
    let mut cfg = PipelineConfig::default();
    cfg.jobs.retry_failed_posts_secs = 0;
    assert!(cfg.validate().unwrap_err().contains("retry_failed_posts_secs"));
}

#[test]
fn test_zero_call_timeout_rejected() {
    let mut cfg = PipelineConfig::default();
    cfg.dispatcher.call_timeout_secs = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_stale_claim_must_outlive_call_timeout() {
    let mut cfg = PipelineConfig::default();
    cfg.dispatcher.call_timeout_secs = 1_200;
    cfg.engine.stale_claim_secs = 900;
    assert!(cfg.validate().unwrap_err().contains("stale_claim_secs"));

    cfg.engine.stale_claim_secs = 1_200 + STALE_CLAIM_MARGIN_SECS;
    assert!(cfg.validate().is_err());

    cfg.engine.stale_claim_secs = 1_200 + STALE_CLAIM_MARGIN_SECS + 1;
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_worker_pool_errors_are_prefixed() {
    let cfg = PipelineConfig {
        worker_pool: WorkerPoolConfig::new().with_worker_count(0),
        ..PipelineConfig::default()
    };
    assert!(cfg.validate().unwrap_err().starts_with("worker_pool invalid"));
}

#[test]
fn test_worker_pool_small_stack_rejected() {
    let cfg = WorkerPoolConfig::new().with_thread_stack_size(1024);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "engine": { "max_retries": 5, "conflict_window_secs": 600 },
        "jobs": { "publish_due_posts_secs": 60 },
        "worker_pool": { "worker_count": 2 }
    }"#;
    let cfg = PipelineConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.engine.max_retries, 5);
    assert_eq!(cfg.engine.conflict_window_secs, 600);
    assert_eq!(cfg.jobs.publish_due_posts_secs, 60);
    assert_eq!(cfg.jobs.cleanup_secs, 86_400);
    assert_eq!(cfg.worker_pool.worker_count, 2);
}

#[test]
fn test_config_from_json_rejects_invalid_values() {
    let err = PipelineConfig::from_json_str(r#"{"health":{"tick_secs":0}}"#).unwrap_err();
    assert!(err.contains("tick_secs"));

    let err = PipelineConfig::from_json_str("not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_config_from_missing_file() {
    let err = PipelineConfig::from_file("/definitely/not/here.json").unwrap_err();
    assert!(err.to_string().contains("reading config file"));
}

#[test]
fn test_overrides_apply_to_sections() {
    let mut cfg = PipelineConfig::default();
    cfg.apply_overrides(|key| match key {
        "PIPELINE_CALL_TIMEOUT_SECS" => Some("45".into()),
        "PIPELINE_DRAIN_TIMEOUT_SECS" => Some(" 10 ".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(cfg.dispatcher.call_timeout_secs, 45);
    assert_eq!(cfg.health.drain_timeout_secs, 10);
}

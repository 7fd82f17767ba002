//! Tests for error types

use content_pipeline::core::{ExternalErrorKind, PipelineError, PoolError};
use content_pipeline::util::QueueLane;

#[test]
fn test_validation_error() {
    let err = PipelineError::validation("timezone must not be empty");
    assert_eq!(
        format!("{err}"),
        "validation failed: timezone must not be empty"
    );
    assert!(!err.is_conflict());
}

#[test]
fn test_conflict_error() {
    let err = PipelineError::conflict("post already approved");
    assert_eq!(format!("{err}"), "state conflict: post already approved");
    assert!(err.is_conflict());
}

#[test]
fn test_not_found_error() {
    let err = PipelineError::not_found("post", "post_123");
    assert_eq!(format!("{err}"), "post `post_123` not found");
}

#[test]
fn test_stalled_job_error() {
    let err = PipelineError::StalledJob {
        job_id: "publish-due-posts".into(),
        idle_secs: 901,
    };
    assert_eq!(
        format!("{err}"),
        "job `publish-due-posts` stalled: no execution for 901s"
    );
}

#[test]
fn test_external_error_retryability() {
    assert!(ExternalErrorKind::RateLimited.is_retryable());
    assert!(ExternalErrorKind::Transient.is_retryable());
    assert!(!ExternalErrorKind::Unauthorized.is_retryable());
    assert!(!ExternalErrorKind::Terminal.is_retryable());
}

#[test]
fn test_pool_error_maps_to_backend() {
    let err: PipelineError = PoolError::QueueFull(QueueLane::Critical).into();
    assert_eq!(
        format!("{err}"),
        "backend error: worker pool: critical queue is full"
    );
}

//! Integration tests for the editorial review workflow
//!
//! These tests validate:
//! - Guarded review transitions persisted through the store
//! - Batch review with per-item outcomes
//! - Project stage advancing once a review gate is satisfied
//! - Activity recorded for every committed review

mod common;

use common::Fixture;
use content_pipeline::core::model::{
    ContentProject, Insight, InsightStatus, Post, PostStatus, ProjectStage,
};
use content_pipeline::core::{PipelineError, PipelineStore};
use content_pipeline::util::{Clock, Platform};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn draft_insight(fx: &Fixture, project: &ContentProject, title: &str) -> Insight {
    let insight = Insight::new(&project.id, "tr-1", title, "Body", fx.clock.now());
    fx.store.insert_insight(insight.clone()).unwrap();
    insight
}

fn draft_post(fx: &Fixture, project: &ContentProject) -> Post {
    let post = Post::new(
        &project.id,
        "insight-1",
        &project.user_id,
        Platform::LinkedIn,
        "Draft copy",
        fx.clock.now(),
    );
    fx.store.insert_post(post.clone()).unwrap();
    post
}

// ============================================================================
// INSIGHTS
// ============================================================================

#[test]
fn approving_every_insight_advances_the_project() {
    let fx = Fixture::new();
    let workflow = fx.approval();
    let project = fx.project_at(ProjectStage::InsightsReady);
    let first = draft_insight(&fx, &project, "Hook");
    let second = draft_insight(&fx, &project, "Story");

    workflow.approve_insight(&first.id, "editor").unwrap();
    assert_eq!(
        fx.store.get_project(&project.id).unwrap().stage,
        ProjectStage::InsightsReady
    );

    workflow
        .reject_insight(&second.id, "editor", "off brand")
        .unwrap();
    assert_eq!(
        fx.store.get_project(&project.id).unwrap().stage,
        ProjectStage::InsightsApproved
    );

    let stored = fx.store.get_insight(&second.id).unwrap();
    assert_eq!(stored.status, InsightStatus::Rejected);
    assert_eq!(
        stored.review.unwrap().reason.as_deref(),
        Some("off brand")
    );
    assert_eq!(fx.sink.events_of_kind("insight.approved").len(), 1);
    assert_eq!(fx.sink.events_of_kind("insight.rejected").len(), 1);
}

#[test]
fn rejecting_every_insight_leaves_the_project_waiting() {
    let fx = Fixture::new();
    let workflow = fx.approval();
    let project = fx.project_at(ProjectStage::InsightsReady);
    let only = draft_insight(&fx, &project, "Hook");

    workflow.reject_insight(&only.id, "editor", "thin").unwrap();
    assert_eq!(
        fx.store.get_project(&project.id).unwrap().stage,
        ProjectStage::InsightsReady
    );
}

#[test]
fn invalid_reviews_are_rejected_without_writes() {
    let fx = Fixture::new();
    let workflow = fx.approval();
    let project = fx.project_at(ProjectStage::InsightsReady);
    let insight = draft_insight(&fx, &project, "Hook");

    assert!(matches!(
        workflow.reject_insight(&insight.id, "editor", "  "),
        Err(PipelineError::Validation(_))
    ));
    assert!(matches!(
        workflow.approve_insight("missing", "editor"),
        Err(PipelineError::NotFound { .. })
    ));
    assert_eq!(
        fx.store.get_insight(&insight.id).unwrap().status,
        InsightStatus::Draft
    );

    workflow.approve_insight(&insight.id, "editor").unwrap();
    assert!(workflow
        .approve_insight(&insight.id, "editor")
        .unwrap_err()
        .is_conflict());
    assert!(fx.sink.events_of_kind("insight.rejected").is_empty());
}

#[test]
fn archived_insight_cannot_be_reviewed() {
    let fx = Fixture::new();
    let workflow = fx.approval();
    let project = fx.project_at(ProjectStage::InsightsReady);
    let insight = draft_insight(&fx, &project, "Hook");

    let archived = workflow
        .archive_insight(&insight.id, "editor", "duplicate")
        .unwrap();
    assert_eq!(archived.status, InsightStatus::Draft);
    assert!(archived.archived.is_some());
    assert!(workflow
        .approve_insight(&insight.id, "editor")
        .unwrap_err()
        .is_conflict());
}

// ============================================================================
// POSTS
// ============================================================================

#[test]
fn batch_post_approval_reports_each_item() {
    let fx = Fixture::new();
    let workflow = fx.approval();
    let project = fx.project_at(ProjectStage::PostsGenerated);
    let first = draft_post(&fx, &project);
    let second = draft_post(&fx, &project);
    let already = fx.approved_post(&project, Platform::LinkedIn);

    let report = workflow.approve_posts(&[&first.id, &already.id, &second.id], "editor");

    assert_eq!(report.succeeded, vec![first.id.clone(), second.id.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, already.id);
    assert!(report.failed[0].conflict);
    assert!(!report.all_succeeded());
    assert_eq!(
        fx.store.get_project(&project.id).unwrap().stage,
        ProjectStage::PostsApproved
    );
    assert_eq!(fx.sink.events_of_kind("project.posts_approved").len(), 1);
}

#[test]
fn batch_post_rejection_keeps_the_project_in_review() {
    let fx = Fixture::new();
    let workflow = fx.approval();
    let project = fx.project_at(ProjectStage::PostsGenerated);
    let first = draft_post(&fx, &project);
    let second = draft_post(&fx, &project);

    let report = workflow.reject_posts(&[first.id.as_str(), second.id.as_str()], "editor", "tone");
    assert!(report.all_succeeded());
    assert_eq!(
        fx.store.get_post(&first.id).unwrap().status,
        PostStatus::Rejected
    );
    assert_eq!(
        fx.store.get_project(&project.id).unwrap().stage,
        ProjectStage::PostsGenerated
    );

    workflow.approve_post(&first.id, "editor").unwrap();
    let approved = fx.store.get_post(&first.id).unwrap();
    assert_eq!(approved.status, PostStatus::Approved);
    assert!(approved.rejection.is_none());
    assert_eq!(
        fx.store.get_project(&project.id).unwrap().stage,
        ProjectStage::PostsApproved
    );
}

#[test]
fn scheduled_post_cannot_be_archived() {
    let fx = Fixture::new();
    let workflow = fx.approval();
    let project = fx.project_at(ProjectStage::PostsApproved);
    let post = fx.approved_post(&project, Platform::LinkedIn);
    fx.engine
        .schedule(
            &post.id,
            Platform::LinkedIn,
            fx.clock.now() + chrono::Duration::hours(1),
            "UTC",
        )
        .unwrap();

    assert!(workflow
        .archive_post(&post.id, "editor", "stale")
        .unwrap_err()
        .is_conflict());
    assert_eq!(
        fx.store.get_post(&post.id).unwrap().status,
        PostStatus::Scheduled
    );
}

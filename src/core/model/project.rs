//! Content project and its stage machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DomainEvent, Transition};
use crate::core::PipelineError;
use crate::util::{new_id, EntityId};

/// Ordered lifecycle position of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStage {
    /// Content uploaded, nothing processed yet.
    RawContent,
    /// Transcript cleaning / insight extraction running.
    ProcessingContent,
    /// Insights extracted, awaiting review.
    InsightsReady,
    /// Insights reviewed.
    InsightsApproved,
    /// Post drafts generated, awaiting review.
    PostsGenerated,
    /// Posts reviewed.
    PostsApproved,
    /// At least one post is scheduled.
    Scheduled,
    /// Publishing in progress.
    Publishing,
    /// Every post delivered.
    Published,
    /// Retired.
    Archived,
}

impl ProjectStage {
    /// Stages in pipeline order.
    pub const ORDER: [Self; 10] = [
        Self::RawContent,
        Self::ProcessingContent,
        Self::InsightsReady,
        Self::InsightsApproved,
        Self::PostsGenerated,
        Self::PostsApproved,
        Self::Scheduled,
        Self::Publishing,
        Self::Published,
        Self::Archived,
    ];

    /// Progress through the pipeline in percent. `Published` and `Archived` are 100.
    #[must_use]
    pub fn progress_percent(self) -> u8 {
        let last = Self::ORDER
            .iter()
            .position(|s| *s == Self::Published)
            .unwrap_or(Self::ORDER.len() - 1);
        let idx = Self::ORDER
            .iter()
            .position(|s| *s == self)
            .unwrap_or(last)
            .min(last);
        u8::try_from(idx * 100 / last).unwrap_or(100)
    }
}

impl fmt::Display for ProjectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RawContent => "raw_content",
            Self::ProcessingContent => "processing_content",
            Self::InsightsReady => "insights_ready",
            Self::InsightsApproved => "insights_approved",
            Self::PostsGenerated => "posts_generated",
            Self::PostsApproved => "posts_approved",
            Self::Scheduled => "scheduled",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Archived => "archived",
        };
        f.write_str(name)
    }
}

/// Named stage transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectAction {
    /// Begin transcript processing.
    StartProcessing,
    /// Processing produced insights.
    CompleteProcessing,
    /// Processing failed; back to raw content.
    FailProcessing,
    /// Insight review finished.
    ApproveInsights,
    /// Post drafts generated.
    GeneratePosts,
    /// Post review finished.
    ApprovePosts,
    /// First post scheduled.
    SchedulePosts,
    /// First publish attempt succeeded (or publish-now started).
    StartPublishing,
    /// Every post published.
    CompletePublishing,
    /// Publishing failed with nothing delivered.
    FailPublishing,
    /// Retire the project.
    Archive,
}

impl ProjectAction {
    /// All actions, in table order.
    pub const ALL: [Self; 11] = [
        Self::StartProcessing,
        Self::CompleteProcessing,
        Self::FailProcessing,
        Self::ApproveInsights,
        Self::GeneratePosts,
        Self::ApprovePosts,
        Self::SchedulePosts,
        Self::StartPublishing,
        Self::CompletePublishing,
        Self::FailPublishing,
        Self::Archive,
    ];

    /// Stage reached by applying this action from `from`, if legal.
    #[must_use]
    pub fn target(self, from: ProjectStage) -> Option<ProjectStage> {
        use ProjectStage as S;
        match (self, from) {
            (Self::StartProcessing, S::RawContent) => Some(S::ProcessingContent),
            (Self::CompleteProcessing, S::ProcessingContent) => Some(S::InsightsReady),
            (Self::FailProcessing, S::ProcessingContent) => Some(S::RawContent),
            (Self::ApproveInsights, S::InsightsReady) => Some(S::InsightsApproved),
            (Self::GeneratePosts, S::InsightsApproved) => Some(S::PostsGenerated),
            (Self::ApprovePosts, S::PostsGenerated) => Some(S::PostsApproved),
            (Self::SchedulePosts, S::PostsApproved) => Some(S::Scheduled),
            (Self::StartPublishing, S::PostsApproved | S::Scheduled) => Some(S::Publishing),
            (Self::CompletePublishing, S::Publishing) => Some(S::Published),
            (Self::FailPublishing, S::Publishing) => Some(S::PostsApproved),
            (Self::Archive, s) if s != S::Archived => Some(S::Archived),
            _ => None,
        }
    }

    fn event_name(self) -> &'static str {
        match self {
            Self::StartProcessing => "project.processing_started",
            Self::CompleteProcessing => "project.processing_completed",
            Self::FailProcessing => "project.processing_failed",
            Self::ApproveInsights => "project.insights_approved",
            Self::GeneratePosts => "project.posts_generated",
            Self::ApprovePosts => "project.posts_approved",
            Self::SchedulePosts => "project.scheduled",
            Self::StartPublishing => "project.publishing_started",
            Self::CompletePublishing => "project.published",
            Self::FailPublishing => "project.publishing_failed",
            Self::Archive => "project.archived",
        }
    }
}

/// Aggregate counters maintained by the analytics job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetrics {
    /// Transcripts attached.
    pub transcripts: u32,
    /// Insights extracted.
    pub insights: u32,
    /// Posts generated.
    pub posts: u32,
    /// Scheduled-post records in Pending.
    pub scheduled: u32,
    /// Posts published.
    pub published: u32,
    /// Posts failed.
    pub failed: u32,
}

/// A content project moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentProject {
    /// Identifier.
    pub id: EntityId,
    /// Owning user (also the credential owner for publishing).
    pub user_id: String,
    /// Display title.
    pub title: String,
    /// Current stage.
    pub stage: ProjectStage,
    /// Aggregates.
    pub metrics: ProjectMetrics,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
    /// Time of the last stage change.
    pub stage_changed_at: DateTime<Utc>,
}

impl ContentProject {
    /// New project in `RawContent`.
    pub fn new(user_id: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id("proj"),
            user_id: user_id.into(),
            title: title.into(),
            stage: ProjectStage::RawContent,
            metrics: ProjectMetrics::default(),
            created_at: now,
            updated_at: now,
            stage_changed_at: now,
        }
    }

    /// Apply a stage action.
    ///
    /// # Errors
    ///
    /// `StateConflict` when the action is not legal from the current stage.
    pub fn apply(
        &self,
        action: ProjectAction,
        now: DateTime<Utc>,
    ) -> Result<Transition<Self>, PipelineError> {
        let Some(to) = action.target(self.stage) else {
            return Err(PipelineError::conflict(format!(
                "project {} cannot {:?} from stage {}",
                self.id, action, self.stage
            )));
        };
        let mut next = self.clone();
        next.stage = to;
        next.updated_at = now;
        next.stage_changed_at = now;
        let event = DomainEvent::new(
            "project",
            &self.id,
            action.event_name(),
            format!("stage {} -> {}", self.stage, to),
        )
        .with_metadata(serde_json::json!({ "from": self.stage, "to": to }));
        Ok(Transition { next, event })
    }

    /// Actions legal from the current stage.
    #[must_use]
    pub fn allowed_actions(&self) -> Vec<ProjectAction> {
        ProjectAction::ALL
            .into_iter()
            .filter(|a| a.target(self.stage).is_some())
            .collect()
    }

    /// Replace the aggregates. Not a stage change.
    #[must_use]
    pub fn with_metrics(&self, metrics: ProjectMetrics, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.metrics = metrics;
        next.updated_at = now;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_at(stage: ProjectStage) -> ContentProject {
        let mut p = ContentProject::new("user-1", "Episode 12", Utc::now());
        p.stage = stage;
        p
    }

    #[test]
    fn happy_path_walks_every_stage() {
        let now = Utc::now();
        let mut p = project_at(ProjectStage::RawContent);
        for action in [
            ProjectAction::StartProcessing,
            ProjectAction::CompleteProcessing,
            ProjectAction::ApproveInsights,
            ProjectAction::GeneratePosts,
            ProjectAction::ApprovePosts,
            ProjectAction::SchedulePosts,
            ProjectAction::StartPublishing,
            ProjectAction::CompletePublishing,
        ] {
            p = p.apply(action, now).unwrap().next;
        }
        assert_eq!(p.stage, ProjectStage::Published);
        assert_eq!(p.stage.progress_percent(), 100);
    }

    #[test]
    fn skipping_a_stage_is_a_conflict() {
        let p = project_at(ProjectStage::InsightsReady);
        let err = p.apply(ProjectAction::ApprovePosts, Utc::now()).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn fail_publishing_regresses_to_posts_approved() {
        let p = project_at(ProjectStage::Publishing);
        let t = p.apply(ProjectAction::FailPublishing, Utc::now()).unwrap();
        assert_eq!(t.next.stage, ProjectStage::PostsApproved);
        assert_eq!(t.event.kind, "project.publishing_failed");
    }

    #[test]
    fn publishing_can_start_without_scheduling() {
        let p = project_at(ProjectStage::PostsApproved);
        assert!(p.allowed_actions().contains(&ProjectAction::StartPublishing));
    }

    #[test]
    fn archived_projects_are_frozen() {
        let p = project_at(ProjectStage::Archived);
        assert!(p.allowed_actions().is_empty());
    }

    #[test]
    fn progress_is_monotonic_in_stage_order() {
        let values: Vec<u8> = ProjectStage::ORDER
            .iter()
            .map(|s| s.progress_percent())
            .collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(ProjectStage::RawContent.progress_percent(), 0);
    }
}

//! Storage for teams, memberships and survey progress.

mod memory;
mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PgRepository;

use crate::models::{SurveyProgress, SurveyStep, Team, TeamMembership};
use crate::services::error::PortalError;
use async_trait::async_trait;
use uuid::Uuid;

/// Result of [`SurveyRepository::ensure_membership`].
#[derive(Debug, Clone, PartialEq)]
pub enum EnsuredMembership {
    Created(TeamMembership),
    /// A row already existed and was left untouched.
    Existing(TeamMembership),
}

impl EnsuredMembership {
    pub fn membership(&self) -> &TeamMembership {
        match self {
            EnsuredMembership::Created(m) | EnsuredMembership::Existing(m) => m,
        }
    }

    pub fn into_membership(self) -> TeamMembership {
        match self {
            EnsuredMembership::Created(m) | EnsuredMembership::Existing(m) => m,
        }
    }
}

/// One accepted step submission to persist.
#[derive(Debug)]
pub struct StepCommit<'a> {
    /// Current step the caller based its decision on.
    pub expected_step: SurveyStep,
    pub submitted: SurveyStep,
    /// Progress after the submission.
    pub progress: &'a SurveyProgress,
    pub payload: &'a serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Stored progress moved on since the caller read it; nothing was written.
    Stale,
}

#[async_trait]
pub trait SurveyRepository: Send + Sync {
    async fn health_check(&self) -> Result<(), PortalError>;

    async fn insert_team(&self, team: &Team) -> Result<(), PortalError>;
    async fn find_team(&self, team_id: Uuid) -> Result<Option<Team>, PortalError>;
    async fn list_owned_teams(&self, owner_id: &str) -> Result<Vec<Team>, PortalError>;

    async fn find_membership(
        &self,
        user_id: &str,
        team_id: Uuid,
    ) -> Result<Option<TeamMembership>, PortalError>;
    async fn list_memberships(&self, user_id: &str) -> Result<Vec<TeamMembership>, PortalError>;
    async fn list_team_members(&self, team_id: Uuid) -> Result<Vec<TeamMembership>, PortalError>;

    /// Insert `membership` unless a row for the same (user, team) exists.
    async fn ensure_membership(
        &self,
        membership: TeamMembership,
    ) -> Result<EnsuredMembership, PortalError>;

    async fn find_progress(
        &self,
        user_id: &str,
        team_id: Uuid,
    ) -> Result<Option<SurveyProgress>, PortalError>;

    /// Store the response and the new progress atomically, provided the stored
    /// current step still equals `expected_step`. When the new progress is
    /// complete the membership is marked answered in the same unit of work; a
    /// missing membership aborts everything with `ProgressInconsistency`.
    async fn commit_step(&self, commit: StepCommit<'_>) -> Result<CommitOutcome, PortalError>;
}

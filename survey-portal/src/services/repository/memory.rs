use super::{CommitOutcome, EnsuredMembership, StepCommit, SurveyRepository};
use crate::models::{SurveyProgress, SurveyStep, Team, TeamMembership};
use crate::services::error::PortalError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

type MemberKey = (String, Uuid);

#[derive(Default)]
struct State {
    teams: HashMap<Uuid, Team>,
    memberships: HashMap<MemberKey, TeamMembership>,
    progress: HashMap<MemberKey, SurveyProgress>,
    responses: HashMap<(String, Uuid, SurveyStep), Value>,
}

/// Process-local repository. One lock guards every map, so a step commit and
/// its membership update are observed together or not at all.
#[derive(Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored response for a step, if any.
    pub async fn response(&self, user_id: &str, team_id: Uuid, step: SurveyStep) -> Option<Value> {
        self.state
            .read()
            .await
            .responses
            .get(&(user_id.to_string(), team_id, step))
            .cloned()
    }
}

#[async_trait]
impl SurveyRepository for InMemoryRepository {
    async fn health_check(&self) -> Result<(), PortalError> {
        Ok(())
    }

    async fn insert_team(&self, team: &Team) -> Result<(), PortalError> {
        self.state.write().await.teams.insert(team.id, team.clone());
        Ok(())
    }

    async fn find_team(&self, team_id: Uuid) -> Result<Option<Team>, PortalError> {
        Ok(self.state.read().await.teams.get(&team_id).cloned())
    }

    async fn list_owned_teams(&self, owner_id: &str) -> Result<Vec<Team>, PortalError> {
        let state = self.state.read().await;
        let mut teams: Vec<Team> = state
            .teams
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect();
        teams.sort_by_key(|t| t.created_at);
        Ok(teams)
    }

    async fn find_membership(
        &self,
        user_id: &str,
        team_id: Uuid,
    ) -> Result<Option<TeamMembership>, PortalError> {
        Ok(self
            .state
            .read()
            .await
            .memberships
            .get(&(user_id.to_string(), team_id))
            .cloned())
    }

    async fn list_memberships(&self, user_id: &str) -> Result<Vec<TeamMembership>, PortalError> {
        let state = self.state.read().await;
        let mut memberships: Vec<TeamMembership> = state
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        memberships.sort_by_key(|m| m.joined_at);
        Ok(memberships)
    }

    async fn list_team_members(&self, team_id: Uuid) -> Result<Vec<TeamMembership>, PortalError> {
        let state = self.state.read().await;
        let mut memberships: Vec<TeamMembership> = state
            .memberships
            .values()
            .filter(|m| m.team_id == team_id)
            .cloned()
            .collect();
        memberships.sort_by_key(|m| m.joined_at);
        Ok(memberships)
    }

    async fn ensure_membership(
        &self,
        membership: TeamMembership,
    ) -> Result<EnsuredMembership, PortalError> {
        let mut state = self.state.write().await;
        let key = (membership.user_id.clone(), membership.team_id);
        if let Some(existing) = state.memberships.get(&key) {
            return Ok(EnsuredMembership::Existing(existing.clone()));
        }
        state.memberships.insert(key, membership.clone());
        Ok(EnsuredMembership::Created(membership))
    }

    async fn find_progress(
        &self,
        user_id: &str,
        team_id: Uuid,
    ) -> Result<Option<SurveyProgress>, PortalError> {
        Ok(self
            .state
            .read()
            .await
            .progress
            .get(&(user_id.to_string(), team_id))
            .cloned())
    }

    async fn commit_step(&self, commit: StepCommit<'_>) -> Result<CommitOutcome, PortalError> {
        let mut state = self.state.write().await;
        let progress = commit.progress;
        let key = (progress.user_id.clone(), progress.team_id);

        let stored_step = state
            .progress
            .get(&key)
            .map(|p| p.current_step)
            .unwrap_or(SurveyStep::Demographic);
        if stored_step != commit.expected_step {
            return Ok(CommitOutcome::Stale);
        }

        // Validate the membership before touching anything.
        if progress.is_complete() {
            match state.memberships.get_mut(&key) {
                Some(membership) => {
                    membership.mark_answered(progress.completed_at.unwrap_or(progress.updated_at));
                }
                None => {
                    return Err(PortalError::ProgressInconsistency(format!(
                        "no membership for user {} in team {}",
                        progress.user_id, progress.team_id
                    )));
                }
            }
        }

        state.responses.insert(
            (progress.user_id.clone(), progress.team_id, commit.submitted),
            commit.payload.clone(),
        );
        state.progress.insert(key, progress.clone());
        Ok(CommitOutcome::Committed)
    }
}

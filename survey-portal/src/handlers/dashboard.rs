use crate::AppState;
use crate::models::{CurrentUser, MembershipStatus, ProgressResponse, Role, Team};
use axum::{Json, extract::State};
use portal_core::error::AppError;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct MembershipView {
    pub team_id: Uuid,
    pub team_name: String,
    pub status: MembershipStatus,
    pub progress: ProgressResponse,
}

#[derive(Debug, Serialize)]
pub struct MemberDashboard {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub memberships: Vec<MembershipView>,
    /// Present for LEADER accounts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owned_teams: Option<Vec<Team>>,
}

async fn membership_views(state: &AppState, user_id: &str) -> Result<Vec<MembershipView>, AppError> {
    let tracker = state.tracker();
    let mut views = Vec::new();
    for membership in state.repository.list_memberships(user_id).await? {
        let team_name = state
            .repository
            .find_team(membership.team_id)
            .await?
            .map(|t| t.name)
            .unwrap_or_default();
        let progress = tracker.progress(user_id, membership.team_id).await?;
        views.push(MembershipView {
            team_id: membership.team_id,
            team_name,
            status: membership.status,
            progress: ProgressResponse::from(&progress),
        });
    }
    Ok(views)
}

pub async fn member_dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MemberDashboard>, AppError> {
    let memberships = membership_views(&state, &user.user_id).await?;
    let owned_teams = if user.role.can_own_teams() {
        Some(state.repository.list_owned_teams(&user.user_id).await?)
    } else {
        None
    };

    Ok(Json(MemberDashboard {
        user_id: user.user_id,
        email: user.email,
        role: user.role,
        memberships,
        owned_teams,
    }))
}

#[derive(Debug, Serialize)]
pub struct ResultsPage {
    pub completed: Vec<MembershipView>,
}

/// Surveys the user has finished.
pub async fn results(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ResultsPage>, AppError> {
    let completed = membership_views(&state, &user.user_id)
        .await?
        .into_iter()
        .filter(|v| v.progress.complete)
        .collect();
    Ok(Json(ResultsPage { completed }))
}

#[derive(Debug, Serialize)]
pub struct OwnedTeamView {
    #[serde(flatten)]
    pub team: Team,
    pub invited: usize,
    pub answered: usize,
}

#[derive(Debug, Serialize)]
pub struct OrganizationDashboard {
    pub user_id: String,
    pub email: String,
    pub teams: Vec<OwnedTeamView>,
}

pub async fn org_dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<OrganizationDashboard>, AppError> {
    let mut teams = Vec::new();
    for team in state.repository.list_owned_teams(&user.user_id).await? {
        let members = state.repository.list_team_members(team.id).await?;
        let answered = members
            .iter()
            .filter(|m| m.status == MembershipStatus::Answered)
            .count();
        teams.push(OwnedTeamView {
            invited: members.len() - answered,
            answered,
            team,
        });
    }

    Ok(Json(OrganizationDashboard {
        user_id: user.user_id,
        email: user.email,
        teams,
    }))
}

use crate::AppState;
use crate::models::{CreateTeamRequest, CreateTeamResponse, CurrentUser, MembershipStatus, Team};
use crate::services::PortalError;
use crate::services::invites::invite_link;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use portal_core::error::AppError;
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

/// Create a team owned by the caller and hand back its invite link.
pub async fn create_team(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<CreateTeamRequest>,
) -> Result<(StatusCode, Json<CreateTeamResponse>), AppError> {
    if !user.role.can_own_teams() {
        return Err(PortalError::Forbidden(format!("{} accounts cannot create teams", user.role)).into());
    }
    payload.validate()?;

    let team = Team::new(payload.name.trim().to_string(), user.user_id.clone());
    state.repository.insert_team(&team).await?;

    let token = state.invite_signer.issue(team.id, Utc::now())?;
    let invite_url = invite_link(&state.settings.server.public_url, &token, &team.name);

    tracing::info!(team_id = %team.id, owner_id = %user.user_id, "Team created");
    Ok((StatusCode::CREATED, Json(CreateTeamResponse { team, invite_url })))
}

#[derive(Debug, Serialize)]
pub struct TeamMemberView {
    pub user_id: String,
    pub status: MembershipStatus,
    pub joined_at: chrono::DateTime<Utc>,
    pub answered_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TeamDetailResponse {
    pub team: Team,
    pub invite_url: String,
    pub members: Vec<TeamMemberView>,
}

/// Owner's view of a team: who joined and who answered.
pub async fn get_team(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(team_id): Path<Uuid>,
) -> Result<Json<TeamDetailResponse>, AppError> {
    let team = state
        .repository
        .find_team(team_id)
        .await?
        .ok_or(PortalError::TeamNotFound)?;
    if team.owner_id != user.user_id {
        return Err(PortalError::Forbidden("only the team owner can view members".to_string()).into());
    }

    let members = state
        .repository
        .list_team_members(team_id)
        .await?
        .into_iter()
        .map(|m| TeamMemberView {
            user_id: m.user_id,
            status: m.status,
            joined_at: m.joined_at,
            answered_at: m.answered_at,
        })
        .collect();

    let token = state.invite_signer.issue(team.id, Utc::now())?;
    let invite_url = invite_link(&state.settings.server.public_url, &token, &team.name);
    Ok(Json(TeamDetailResponse {
        team,
        invite_url,
        members,
    }))
}

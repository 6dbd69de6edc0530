use crate::AppState;
use crate::middleware::guard::GuardDecision;
use crate::models::{CurrentUser, ProgressResponse, SurveyStep};
use crate::services::progress::{RESULTS_PATH, gate_survey_step, survey_step_path};
use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
};
use portal_core::error::AppError;
use serde::Serialize;
use uuid::Uuid;

fn parse_step(slug: &str) -> Result<SurveyStep, AppError> {
    SurveyStep::from_slug(slug)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Unknown survey step '{}'", slug)))
}

/// `/survey/{team}`: jump to wherever the user currently is.
pub async fn survey_entry(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(team_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let tracker = state.tracker();
    tracker.membership(&user.user_id, team_id).await?;
    let progress = tracker.progress(&user.user_id, team_id).await?;

    let target = if progress.is_complete() {
        RESULTS_PATH.to_string()
    } else {
        survey_step_path(team_id, progress.current_step)
    };
    Ok(Redirect::to(&target).into_response())
}

#[derive(Debug, Serialize)]
struct StepPage {
    team_id: Uuid,
    team_name: String,
    step: SurveyStep,
    progress: ProgressResponse,
}

pub async fn step_page(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((team_id, slug)): Path<(Uuid, String)>,
) -> Result<Response, AppError> {
    let step = parse_step(&slug)?;
    let tracker = state.tracker();
    tracker.membership(&user.user_id, team_id).await?;
    let progress = tracker.progress(&user.user_id, team_id).await?;

    match gate_survey_step(&progress, step) {
        GuardDecision::Allow => {
            let team_name = state
                .repository
                .find_team(team_id)
                .await?
                .map(|t| t.name)
                .unwrap_or_default();
            Ok(Json(StepPage {
                team_id,
                team_name,
                step,
                progress: ProgressResponse::from(&progress),
            })
            .into_response())
        }
        redirect => Ok(redirect.into_response()),
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitStepResponse {
    pub progress: ProgressResponse,
    /// Page to show next.
    pub next: String,
}

pub async fn submit_step(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((team_id, slug)): Path<(Uuid, String)>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<SubmitStepResponse>, AppError> {
    let step = parse_step(&slug)?;
    let progress = state
        .tracker()
        .submit_step(&user.user_id, team_id, step, &payload)
        .await?;

    let next = if progress.is_complete() {
        RESULTS_PATH.to_string()
    } else {
        survey_step_path(team_id, progress.current_step)
    };
    Ok(Json(SubmitStepResponse {
        progress: ProgressResponse::from(&progress),
        next,
    }))
}

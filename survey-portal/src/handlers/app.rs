use crate::AppState;
use crate::models::{AuthSession, Portal};
use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub async fn index(portal: Portal, session: Option<Extension<AuthSession>>) -> impl IntoResponse {
    let signed_in = session.is_some();
    Json(json!({
        "portal": portal,
        "signed_in": signed_in,
        "links": {
            "login": portal.login_path(),
            "sign_up": portal.sign_up_path(),
            "dashboard": portal.landing_path(),
        }
    }))
}

pub async fn health_check(State(state): State<AppState>) -> Response {
    match state.repository.health_check().await {
        Ok(()) => "OK".into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE").into_response()
        }
    }
}

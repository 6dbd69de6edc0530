use crate::AppState;
use crate::handlers::redirect_with;
use crate::middleware::guard::ERROR_PARAM;
use crate::models::{AuthSession, InviteParams, Portal};
use crate::services::progress::survey_entry_path;
use axum::{
    Extension,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use tower_sessions::Session;

/// Landing page of a shared invite link.
///
/// The invite is parked first. A confirmed member is enrolled on the spot; an
/// unconfirmed one is sent to confirm; everyone else signs up with the invite
/// parameters carried along.
pub async fn invite_landing(
    State(state): State<AppState>,
    store: Session,
    session: Option<Extension<AuthSession>>,
    Query(params): Query<InviteParams>,
) -> Response {
    let portal = Portal::Member;
    let Some(token) = params.invite.as_deref().filter(|t| !t.is_empty()) else {
        return redirect_with(
            portal.sign_up_path(),
            &[(ERROR_PARAM, Some("invalid_invite"))],
        );
    };
    let team_name = params.invite_name.as_deref().unwrap_or_default();

    let invites = state.invites(store);
    if let Err(e) = invites.store_pending_invite(token, team_name).await {
        tracing::error!(error = %e, "Failed to store pending invite");
    }

    let Some(Extension(session)) = session else {
        return redirect_with(
            portal.sign_up_path(),
            &[("invite", Some(token)), ("invite_name", Some(team_name))],
        );
    };

    if !session.is_confirmed() {
        return Redirect::to(portal.confirm_path()).into_response();
    }

    match invites.redeem_pending_invite(Some(&session)).await {
        Ok(Some(membership)) => Redirect::to(&survey_entry_path(membership.team_id)).into_response(),
        Ok(None) => Redirect::to(session.role.portal().landing_path()).into_response(),
        Err(e) => redirect_with(
            session.role.portal().landing_path(),
            &[(ERROR_PARAM, Some(e.error_code()))],
        ),
    }
}

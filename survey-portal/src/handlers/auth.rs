//! Sign-in, sign-up, email confirmation, provider callback and sign-out for
//! both portals. Failures come back to the form as `?error=<code>` redirects.

use crate::AppState;
use crate::handlers::redirect_with;
use crate::middleware::guard::{ERROR_PARAM, REDIRECT_TO_PARAM};
use crate::models::{AuthSession, Credentials, Portal, Role, SignUpForm};
use crate::services::PortalError;
use crate::services::progress::survey_entry_path;
use crate::utils::redirect::{sanitize_redirect, with_query};
use axum::{
    Extension, Form, Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;
use tower_sessions::Session;
use validator::Validate;

const CALLBACK_ERROR: &str = "callback_error";

#[derive(Debug, Default, Deserialize)]
pub struct AuthPageQuery {
    pub error: Option<String>,
    #[serde(rename = "redirectTo", alias = "redirectedFrom")]
    pub redirect_to: Option<String>,
    pub invite: Option<String>,
    pub invite_name: Option<String>,
    pub email: Option<String>,
}

impl AuthPageQuery {
    fn safe_redirect_to(&self) -> Option<String> {
        self.redirect_to.as_deref().and_then(sanitize_redirect)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub invite: Option<String>,
    pub invite_name: Option<String>,
    #[serde(rename = "redirectTo", alias = "redirectedFrom")]
    pub redirect_to: Option<String>,
}

/// Where a freshly authenticated user goes next.
///
/// Unconfirmed accounts wait on the confirmation page. Otherwise a pending
/// invite is redeemed first and wins, then a safe `redirectTo`, then the
/// portal's landing page. Redemption failures never block sign-in.
pub async fn post_auth_redirect(
    state: &AppState,
    portal: Portal,
    store: Session,
    session: &AuthSession,
    redirect_to: Option<String>,
) -> Response {
    if !session.is_confirmed() {
        return redirect_with(portal.confirm_path(), &[("email", Some(session.email.as_str()))]);
    }

    match state.invites(store).redeem_pending_invite(Some(session)).await {
        Ok(Some(membership)) => {
            return Redirect::to(&survey_entry_path(membership.team_id)).into_response();
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(user_id = %session.user_id, error = %e, "Continuing sign-in without invite");
        }
    }

    let target = redirect_to.unwrap_or_else(|| portal.landing_path().to_string());
    Redirect::to(&target).into_response()
}

fn back_to_login(portal: Portal, error: &str, redirect_to: Option<&str>) -> Response {
    redirect_with(
        portal.login_path(),
        &[(ERROR_PARAM, Some(error)), (REDIRECT_TO_PARAM, redirect_to)],
    )
}

pub async fn login_page(portal: Portal, Query(query): Query<AuthPageQuery>) -> impl IntoResponse {
    Json(json!({
        "page": "login",
        "portal": portal,
        "error": query.error,
        "redirect_to": query.safe_redirect_to(),
        "sign_in_action": portal.login_path(),
        "sign_up": portal.sign_up_path(),
    }))
}

pub async fn sign_in_handler(
    State(state): State<AppState>,
    portal: Portal,
    store: Session,
    Query(query): Query<AuthPageQuery>,
    Form(credentials): Form<Credentials>,
) -> Response {
    let redirect_to = query.safe_redirect_to();

    if credentials.validate().is_err() {
        return back_to_login(portal, "invalid_input", redirect_to.as_deref());
    }

    let resolver = state.resolver(store.clone());
    match resolver.sign_in(&credentials).await {
        Ok(session) => post_auth_redirect(&state, portal, store, &session, redirect_to).await,
        Err(e) => {
            tracing::info!(portal = ?portal, error = %e, "Sign-in rejected");
            back_to_login(portal, e.error_code(), redirect_to.as_deref())
        }
    }
}

pub async fn sign_up_page(portal: Portal, Query(query): Query<AuthPageQuery>) -> impl IntoResponse {
    let roles: &[Role] = match portal {
        Portal::Member => &[Role::Member, Role::Leader],
        Portal::Organization => &[Role::Organization],
    };
    Json(json!({
        "page": "sign-up",
        "portal": portal,
        "roles": roles,
        "error": query.error,
        "invite": query.invite,
        "invite_name": query.invite_name,
        "sign_up_action": with_query(
            portal.sign_up_path(),
            &[("invite", query.invite.as_deref()), ("invite_name", query.invite_name.as_deref())],
        ),
    }))
}

/// The organization portal only registers ORGANIZATION accounts; the member
/// portal registers MEMBER (default) or LEADER.
fn sign_up_role(portal: Portal, requested: Option<Role>) -> Option<Role> {
    match (portal, requested) {
        (Portal::Organization, None | Some(Role::Organization)) => Some(Role::Organization),
        (Portal::Organization, Some(_)) => None,
        (Portal::Member, None) => Some(Role::Member),
        (Portal::Member, Some(role)) if portal.accepts(role) => Some(role),
        (Portal::Member, Some(_)) => None,
    }
}

pub async fn sign_up_handler(
    State(state): State<AppState>,
    portal: Portal,
    store: Session,
    Query(query): Query<AuthPageQuery>,
    Form(form): Form<SignUpForm>,
) -> Response {
    let invite_params = [
        ("invite", query.invite.as_deref()),
        ("invite_name", query.invite_name.as_deref()),
    ];
    let back = |error: &str| {
        let mut params = vec![(ERROR_PARAM, Some(error))];
        params.extend_from_slice(&invite_params);
        redirect_with(portal.sign_up_path(), &params)
    };

    if form.validate().is_err() {
        return back("invalid_input");
    }
    let Some(role) = sign_up_role(portal, form.role) else {
        return back(PortalError::RoleMismatch.error_code());
    };

    let invites = state.invites(store.clone());
    if let Some(token) = &query.invite {
        if let Err(e) = invites
            .store_pending_invite(token, query.invite_name.as_deref().unwrap_or_default())
            .await
        {
            tracing::error!(error = %e, "Failed to store pending invite during sign-up");
        }
    }

    // The confirmation link carries the invite so it survives a different browser.
    let pending = invites.pending_invite().await.ok().flatten();
    let callback = state.settings.portal_url(portal, portal.callback_path());
    let email_redirect_to = with_query(
        &callback,
        &[
            ("invite", pending.as_ref().map(|p| p.token.as_str())),
            ("invite_name", pending.as_ref().map(|p| p.team_name.as_str())),
        ],
    );

    let credentials = form.credentials();
    match state
        .resolver(store.clone())
        .sign_up(&credentials, role, &email_redirect_to)
        .await
    {
        Ok(Some(session)) => post_auth_redirect(&state, portal, store, &session, None).await,
        Ok(None) => redirect_with(portal.confirm_path(), &[("email", Some(credentials.email.as_str()))]),
        Err(e) => {
            tracing::warn!(role = %role, error = %e, "Sign-up failed");
            back(e.error_code())
        }
    }
}

pub async fn confirm_page(
    State(state): State<AppState>,
    portal: Portal,
    store: Session,
    session: Option<Extension<AuthSession>>,
    Query(query): Query<AuthPageQuery>,
) -> Response {
    // Confirmation may have happened in another tab; pick it up.
    if let Some(Extension(current)) = &session {
        if !current.is_confirmed() {
            match state.resolver(store.clone()).refresh().await {
                Ok(Some(fresh)) if fresh.is_confirmed() => {
                    return post_auth_redirect(&state, portal, store, &fresh, None).await;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to refresh session on confirmation page"),
            }
        }
    }

    let email = session
        .as_ref()
        .map(|Extension(s)| s.email.clone())
        .or(query.email);
    Json(json!({
        "page": "confirm",
        "portal": portal,
        "email": email,
        "sign_out_action": portal.sign_out_path(),
    }))
    .into_response()
}

/// Provider redirect target after email confirmation or OAuth sign-in.
pub async fn callback_handler(
    State(state): State<AppState>,
    portal: Portal,
    store: Session,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(token) = &query.invite {
        let name = query.invite_name.as_deref().unwrap_or_default();
        if let Err(e) = state.invites(store.clone()).store_pending_invite(token, name).await {
            tracing::error!(error = %e, "Failed to store invite from callback");
        }
    }

    if let Some(error) = &query.error {
        tracing::warn!(
            error = %error,
            description = query.error_description.as_deref().unwrap_or(""),
            "Identity provider returned an error to the callback"
        );
        return back_to_login(portal, CALLBACK_ERROR, None);
    }
    let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
        return back_to_login(portal, CALLBACK_ERROR, None);
    };

    let cancel = state.shutdown.child_token();
    let session = match state
        .resolver(store.clone())
        .complete_code_exchange(code, &cancel)
        .await
    {
        Ok(session) => session,
        Err(e @ PortalError::SessionTimeout) => return back_to_login(portal, e.error_code(), None),
        Err(e) => {
            tracing::error!(error = %e, "Authorization code exchange failed");
            return back_to_login(portal, CALLBACK_ERROR, None);
        }
    };

    let redirect_to = query.redirect_to.as_deref().and_then(sanitize_redirect);
    post_auth_redirect(&state, portal, store, &session, redirect_to).await
}

pub async fn sign_out_handler(State(state): State<AppState>, portal: Portal, store: Session) -> Response {
    if let Err(e) = state.resolver(store).sign_out().await {
        tracing::error!(error = %e, "Sign-out failed");
    }
    Redirect::to(portal.login_path()).into_response()
}

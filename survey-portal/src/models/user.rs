use crate::models::{AuthSession, Portal};
use crate::services::session::AUTH_SESSION_KEY;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use tower_sessions::Session;

/// Authenticated user for the current request.
///
/// The route guard places the resolved session in the request extensions; the
/// browser-context session store is consulted only when a handler is mounted
/// outside the guard.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthSession);

impl CurrentUser {
    pub fn user_id(&self) -> &str {
        &self.0.user_id
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<AuthSession>() {
            return Ok(CurrentUser(session.clone()));
        }

        let store = Session::from_request_parts(parts, state).await.map_err(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to extract session",
            )
                .into_response()
        })?;

        match store.get::<AuthSession>(AUTH_SESSION_KEY).await {
            Ok(Some(session)) => Ok(CurrentUser(session)),
            Ok(None) => {
                let portal = Portal::from_path(parts.uri.path());
                Err(Redirect::to(portal.login_path()).into_response())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read auth session");
                Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
        }
    }
}

//! Per-request access decision: allow, or redirect somewhere else.
//!
//! [`decide`] is a pure function of the session facts, the portal and the
//! path. The middleware only gathers those inputs and applies the outcome.

use crate::models::{AuthSession, Portal, Role};
use crate::services::session::AUTH_SESSION_KEY;
use crate::utils::redirect::with_query;
use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use metrics::counter;
use portal_core::error::AppError;
use tower_sessions::Session;

pub const REDIRECT_TO_PARAM: &str = "redirectTo";
pub const ERROR_PARAM: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    /// Never checked: confirmation, callback, sign-out, invite landing, probes.
    AuthFlow,
    /// Login and sign-up; a confirmed session is sent to its landing page.
    PublicOnly,
    /// Open to everyone, still subject to the confirmation check.
    Public,
    Protected,
}

/// Classify an absolute request path within `portal`.
pub fn classify_path(portal: Portal, path: &str) -> PathClass {
    let relative = portal.relative(path);
    let relative = match relative.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };

    match relative {
        "/auth/callback" | "/auth/confirm" | "/auth/sign-out" | "/invite" | "/health" | "/metrics" => {
            PathClass::AuthFlow
        }
        "/auth" | "/auth/sign-up" => PathClass::PublicOnly,
        "/" => PathClass::Public,
        _ => PathClass::Protected,
    }
}

/// The parts of a session the guard looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFacts {
    pub role: Role,
    pub confirmed: bool,
}

impl From<&AuthSession> for SessionFacts {
    fn from(session: &AuthSession) -> Self {
        Self {
            role: session.role,
            confirmed: session.is_confirmed(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GuardInput<'a> {
    pub session: Option<SessionFacts>,
    pub portal: Portal,
    pub path: &'a str,
    pub query: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub path: String,
    pub error: Option<&'static str>,
    pub redirect_to: Option<String>,
}

impl RedirectTarget {
    pub fn to(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            error: None,
            redirect_to: None,
        }
    }

    pub fn with_error(mut self, code: &'static str) -> Self {
        self.error = Some(code);
        self
    }

    pub fn with_redirect_to(mut self, target: impl Into<String>) -> Self {
        self.redirect_to = Some(target.into());
        self
    }

    pub fn location(&self) -> String {
        with_query(
            &self.path,
            &[
                (ERROR_PARAM, self.error),
                (REDIRECT_TO_PARAM, self.redirect_to.as_deref()),
            ],
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(RedirectTarget),
}

impl GuardDecision {
    fn outcome(&self) -> &'static str {
        match self {
            GuardDecision::Allow => "allow",
            GuardDecision::Redirect(_) => "redirect",
        }
    }
}

impl IntoResponse for GuardDecision {
    fn into_response(self) -> Response {
        match self {
            GuardDecision::Allow => axum::http::StatusCode::NO_CONTENT.into_response(),
            GuardDecision::Redirect(target) => Redirect::to(&target.location()).into_response(),
        }
    }
}

/// First matching rule wins.
pub fn decide(input: &GuardInput<'_>) -> GuardDecision {
    let portal = input.portal;
    let class = classify_path(portal, input.path);

    if class == PathClass::AuthFlow {
        return GuardDecision::Allow;
    }

    let Some(session) = input.session else {
        if class == PathClass::Protected {
            let original = match input.query {
                Some(q) if !q.is_empty() => format!("{}?{}", input.path, q),
                _ => input.path.to_string(),
            };
            return GuardDecision::Redirect(
                RedirectTarget::to(portal.login_path()).with_redirect_to(original),
            );
        }
        return GuardDecision::Allow;
    };

    if !session.confirmed {
        return GuardDecision::Redirect(RedirectTarget::to(portal.confirm_path()));
    }

    let role_matches = portal.accepts(session.role);

    if class == PathClass::PublicOnly && role_matches {
        return GuardDecision::Redirect(RedirectTarget::to(portal.landing_path()));
    }

    if class == PathClass::Protected && !role_matches {
        return GuardDecision::Redirect(
            RedirectTarget::to(portal.login_path()).with_error("role_mismatch"),
        );
    }

    GuardDecision::Allow
}

/// Applies [`decide`] to every request and hands the session to handlers via
/// request extensions.
pub async fn route_guard_middleware(
    store: Session,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = store
        .get::<AuthSession>(AUTH_SESSION_KEY)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to read session: {}", e)))?
        .filter(|s| !s.is_expired(Utc::now()));

    let portal = req
        .extensions()
        .get::<Portal>()
        .copied()
        .unwrap_or_else(|| Portal::from_path(req.uri().path()));

    let decision = decide(&GuardInput {
        session: session.as_ref().map(SessionFacts::from),
        portal,
        path: req.uri().path(),
        query: req.uri().query(),
    });

    counter!("guard_decisions_total", "outcome" => decision.outcome()).increment(1);

    match decision {
        GuardDecision::Allow => {
            if let Some(session) = session {
                req.extensions_mut().insert(session);
            }
            Ok(next.run(req).await)
        }
        GuardDecision::Redirect(target) => {
            let location = target.location();
            tracing::debug!(path = %req.uri().path(), %location, "Route guard redirect");
            Ok(Redirect::to(&location).into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(role: Role, confirmed: bool) -> Option<SessionFacts> {
        Some(SessionFacts { role, confirmed })
    }

    fn run(session: Option<SessionFacts>, path: &str) -> GuardDecision {
        decide(&GuardInput {
            session,
            portal: Portal::from_path(path),
            path,
            query: None,
        })
    }

    fn location(decision: GuardDecision) -> String {
        match decision {
            GuardDecision::Redirect(target) => target.location(),
            GuardDecision::Allow => panic!("expected a redirect"),
        }
    }

    #[test]
    fn classification() {
        assert_eq!(classify_path(Portal::Member, "/auth/callback"), PathClass::AuthFlow);
        assert_eq!(classify_path(Portal::Organization, "/org/auth/confirm"), PathClass::AuthFlow);
        assert_eq!(classify_path(Portal::Member, "/auth/"), PathClass::PublicOnly);
        assert_eq!(classify_path(Portal::Organization, "/org/auth/sign-up"), PathClass::PublicOnly);
        assert_eq!(classify_path(Portal::Member, "/"), PathClass::Public);
        assert_eq!(classify_path(Portal::Organization, "/org"), PathClass::Public);
        assert_eq!(classify_path(Portal::Member, "/results"), PathClass::Protected);
        assert_eq!(classify_path(Portal::Member, "/authority"), PathClass::Protected);
    }

    #[test]
    fn auth_flow_is_exempt_for_everyone() {
        for session in [None, facts(Role::Member, false), facts(Role::Organization, true)] {
            assert_eq!(run(session, "/auth/callback"), GuardDecision::Allow);
            assert_eq!(run(session, "/org/auth/sign-out"), GuardDecision::Allow);
            assert_eq!(run(session, "/invite"), GuardDecision::Allow);
        }
    }

    #[test]
    fn anonymous_protected_goes_to_login_with_return_path() {
        let decision = decide(&GuardInput {
            session: None,
            portal: Portal::Member,
            path: "/survey/abc/demographic",
            query: Some("lang=en"),
        });
        assert_eq!(
            decision,
            GuardDecision::Redirect(
                RedirectTarget::to("/auth").with_redirect_to("/survey/abc/demographic?lang=en")
            )
        );
        assert_eq!(location(run(None, "/results")), "/auth?redirectTo=%2Fresults");
        assert_eq!(
            location(run(None, "/org/dashboard")),
            "/org/auth?redirectTo=%2Forg%2Fdashboard"
        );
    }

    #[test]
    fn anonymous_public_pages_are_allowed() {
        assert_eq!(run(None, "/"), GuardDecision::Allow);
        assert_eq!(run(None, "/auth"), GuardDecision::Allow);
        assert_eq!(run(None, "/org/auth/sign-up"), GuardDecision::Allow);
    }

    #[test]
    fn unconfirmed_session_goes_to_confirmation() {
        assert_eq!(location(run(facts(Role::Member, false), "/dashboard")), "/auth/confirm");
        assert_eq!(location(run(facts(Role::Member, false), "/auth")), "/auth/confirm");
        assert_eq!(
            location(run(facts(Role::Organization, false), "/org/dashboard")),
            "/org/auth/confirm"
        );
        assert_eq!(run(facts(Role::Member, false), "/auth/confirm"), GuardDecision::Allow);
    }

    #[test]
    fn confirmed_session_skips_login_pages() {
        assert_eq!(location(run(facts(Role::Leader, true), "/auth")), "/dashboard");
        assert_eq!(
            location(run(facts(Role::Organization, true), "/org/auth/sign-up")),
            "/org/dashboard"
        );
    }

    #[test]
    fn member_in_org_portal_is_bounced_with_role_mismatch() {
        assert_eq!(
            location(run(facts(Role::Member, true), "/org/dashboard")),
            "/org/auth?error=role_mismatch"
        );
        // The login page itself stays reachable, so there is no loop.
        assert_eq!(run(facts(Role::Member, true), "/org/auth"), GuardDecision::Allow);
    }

    #[test]
    fn organization_in_member_portal_is_bounced() {
        assert_eq!(
            location(run(facts(Role::Organization, true), "/results")),
            "/auth?error=role_mismatch"
        );
    }

    #[test]
    fn matching_roles_are_allowed() {
        assert_eq!(run(facts(Role::Member, true), "/results"), GuardDecision::Allow);
        assert_eq!(run(facts(Role::Leader, true), "/dashboard"), GuardDecision::Allow);
        assert_eq!(run(facts(Role::Organization, true), "/org/dashboard"), GuardDecision::Allow);
        assert_eq!(run(facts(Role::Organization, true), "/"), GuardDecision::Allow);
    }
}

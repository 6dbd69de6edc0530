use axum::{
    Router,
    handler::Handler,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use portal_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::create_attempt_limiter,
    security_headers::security_headers_middleware,
    tracing::{make_request_span, request_id_middleware},
};
use time::Duration;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};

use crate::AppState;
use crate::handlers::{
    app::{health_check, index},
    auth::{
        callback_handler, confirm_page, login_page, sign_in_handler, sign_out_handler,
        sign_up_handler, sign_up_page,
    },
    dashboard::{member_dashboard, org_dashboard, results},
    invite::invite_landing,
    metrics::metrics,
    survey::{step_page, submit_step, survey_entry},
    teams::{create_team, get_team},
};
use crate::middleware::{
    attempts::attempt_limit_middleware, guard::route_guard_middleware,
    host::host_router_middleware,
};

/// Routes shared by both portals, mounted at the root and under `/org`.
/// Each portal gets its own per-client attempt limiter.
fn auth_routes(state: &AppState) -> Router<AppState> {
    let limiter = create_attempt_limiter(
        state.settings.rate_limit.sign_in_attempts,
        state.settings.rate_limit.window_seconds,
    );
    let attempt_limit = from_fn_with_state(limiter, attempt_limit_middleware);

    Router::new()
        .route("/", get(index))
        .route(
            "/auth",
            get(login_page).post(sign_in_handler.layer(attempt_limit.clone())),
        )
        .route(
            "/auth/sign-up",
            get(sign_up_page).post(sign_up_handler.layer(attempt_limit)),
        )
        .route("/auth/confirm", get(confirm_page))
        .route("/auth/callback", get(callback_handler))
        .route("/auth/sign-out", post(sign_out_handler))
        .route("/teams", post(create_team))
        .route("/teams/:team_id", get(get_team))
}

/// Both portal trees behind the session layer and route guard. Expects paths
/// already mapped by the host router.
pub fn build_router(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(state.settings.server.secure_cookies)
        // Lax keeps the cookie on the top-level redirect back from the provider.
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(Duration::hours(
            state.settings.server.session_idle_hours,
        )));

    let member = auth_routes(&state)
        .route("/invite", get(invite_landing))
        .route("/dashboard", get(member_dashboard))
        .route("/results", get(results))
        .route("/survey/:team_id", get(survey_entry))
        .route("/survey/:team_id/:step", get(step_page).post(submit_step))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics));

    let organization = auth_routes(&state).route("/dashboard", get(org_dashboard));

    Router::new()
        .merge(member)
        .nest("/org", organization)
        .layer(from_fn(route_guard_middleware))
        .layer(session_layer)
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| make_request_span(request)),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .with_state(state)
}

/// The full application: hostname routing in front of [`build_router`].
pub fn build_app(state: AppState) -> Router {
    let routing = state.host_routing();
    Router::new()
        .fallback_service(build_router(state))
        .layer(from_fn_with_state(routing, host_router_middleware))
}

//! Per-client throttling of credential form posts.
//!
//! A throttled post goes back to the form it came from with
//! `?error=too_many_attempts`, keeping the parameters the form was opened with.

use crate::middleware::guard::ERROR_PARAM;
use crate::models::Portal;
use crate::services::PortalError;
use crate::utils::redirect::with_query;
use axum::{
    extract::{Request, State},
    http::{HeaderValue, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use metrics::counter;
use portal_core::middleware::rate_limit::{AttemptLimiter, check_attempt};

/// Query parameters a form carries across a failed attempt.
const CARRIED_PARAMS: [&str; 4] = ["redirectTo", "redirectedFrom", "invite", "invite_name"];

fn form_path(portal: Portal, path: &str) -> &'static str {
    if path.trim_end_matches('/').ends_with("/sign-up") {
        portal.sign_up_path()
    } else {
        portal.login_path()
    }
}

/// Location of the form to return to, with carried parameters and the error.
pub fn throttled_location(portal: Portal, path: &str, query: Option<&str>) -> String {
    let pairs: Vec<(String, String)> = query
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();

    let mut params: Vec<(&str, Option<&str>)> = pairs
        .iter()
        .filter(|(key, _)| CARRIED_PARAMS.contains(&key.as_str()))
        .map(|(key, value)| (key.as_str(), Some(value.as_str())))
        .collect();
    let code = PortalError::TooManyAttempts { retry_after_secs: 0 }.error_code();
    params.push((ERROR_PARAM, Some(code)));

    with_query(form_path(portal, path), &params)
}

pub async fn attempt_limit_middleware(
    State(limiter): State<AttemptLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let Err(wait_time) = check_attempt(&limiter, &request) else {
        return next.run(request).await;
    };

    let portal = request
        .extensions()
        .get::<Portal>()
        .copied()
        .unwrap_or_else(|| Portal::from_path(request.uri().path()));
    counter!("credential_attempts_throttled_total", "portal" => portal_label(portal)).increment(1);

    let location = throttled_location(portal, request.uri().path(), request.uri().query());
    let mut response = Redirect::to(&location).into_response();
    if let Ok(value) = HeaderValue::from_str(&wait_time.as_secs().max(1).to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

fn portal_label(portal: Portal) -> &'static str {
    match portal {
        Portal::Member => "member",
        Portal::Organization => "organization",
    }
}

pub mod app;
pub mod auth;
pub mod dashboard;
pub mod invite;
pub mod metrics;
pub mod survey;
pub mod teams;

use crate::utils::redirect::with_query;
use axum::response::{IntoResponse, Redirect, Response};

/// 303 to `path` with the given query parameters.
pub(crate) fn redirect_with(path: &str, params: &[(&str, Option<&str>)]) -> Response {
    Redirect::to(&with_query(path, params)).into_response()
}

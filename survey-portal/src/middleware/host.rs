//! Hostname-based portal selection, applied before routing.

use crate::models::Portal;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{StatusCode, Uri, header::HOST, request::Parts, uri::PathAndQuery},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::convert::Infallible;
use std::sync::Arc;

/// Paths served identically on every hostname.
const HOST_AGNOSTIC_PATHS: [&str; 2] = ["/health", "/metrics"];

/// Member-only pages; on the organization host they redirect to the member origin.
const MEMBER_ONLY_PATHS: [&str; 1] = ["/invite"];

#[derive(Debug, Clone)]
pub struct HostRouting {
    org_host: Arc<str>,
    member_origin: Option<Arc<str>>,
}

impl HostRouting {
    pub fn new(org_host: &str) -> Self {
        Self {
            org_host: Arc::from(normalize_host(org_host).as_str()),
            member_origin: None,
        }
    }

    /// Origin (`scheme://host[:port]`) that serves the member portal.
    pub fn with_member_origin(mut self, origin: &str) -> Self {
        self.member_origin = Some(Arc::from(origin.trim_end_matches('/')));
        self
    }

    fn is_org_host(&self, host: &str) -> bool {
        normalize_host(host) == *self.org_host
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostDecision {
    PassThrough,
    /// Serve the request as if it had asked for this path and query.
    Rewrite(String),
    PermanentRedirect(String),
}

/// Lower-case and drop the port and any trailing dot.
fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

pub fn route_host(routing: &HostRouting, host: Option<&str>, path_and_query: &str) -> HostDecision {
    let Some(host) = host else {
        return HostDecision::PassThrough;
    };
    if !routing.is_org_host(host) {
        return HostDecision::PassThrough;
    }

    let path = path_and_query
        .split_once('?')
        .map_or(path_and_query, |(path, _)| path);

    if path == "/" {
        return HostDecision::PermanentRedirect(Portal::Organization.landing_path().to_string());
    }
    if MEMBER_ONLY_PATHS.contains(&path) {
        if let Some(origin) = &routing.member_origin {
            return HostDecision::PermanentRedirect(format!("{}{}", origin, path_and_query));
        }
    }
    if Portal::from_path(path) == Portal::Organization || HOST_AGNOSTIC_PATHS.contains(&path) {
        return HostDecision::PassThrough;
    }
    HostDecision::Rewrite(format!("{}{}", Portal::ORG_PREFIX, path_and_query))
}

fn request_host(req: &Request) -> Option<&str> {
    req.headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host())
}

pub async fn host_router_middleware(
    State(routing): State<HostRouting>,
    mut req: Request,
    next: Next,
) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    match route_host(&routing, request_host(&req), &path_and_query) {
        HostDecision::PassThrough => {}
        HostDecision::PermanentRedirect(location) => {
            return Redirect::permanent(&location).into_response();
        }
        HostDecision::Rewrite(rewritten) => {
            let mut parts = req.uri().clone().into_parts();
            let rebuilt = rewritten
                .parse::<PathAndQuery>()
                .ok()
                .and_then(|pq| {
                    parts.path_and_query = Some(pq);
                    Uri::from_parts(parts).ok()
                });
            match rebuilt {
                Some(uri) => {
                    tracing::debug!(from = %path_and_query, to = %uri, "Rewrote request into organization portal");
                    *req.uri_mut() = uri;
                }
                None => return StatusCode::BAD_REQUEST.into_response(),
            }
        }
    }

    let portal = Portal::from_path(req.uri().path());
    req.extensions_mut().insert(portal);
    next.run(req).await
}

#[async_trait]
impl<S> FromRequestParts<S> for Portal
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Portal>()
            .copied()
            .unwrap_or_else(|| Portal::from_path(parts.uri.path())))
    }
}

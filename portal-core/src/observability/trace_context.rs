//! W3C trace context propagation for outbound calls to collaborating services
//! (the identity provider, in this workspace).

use opentelemetry::trace::TraceContextExt;
use reqwest::header::HeaderMap;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Write the current span's context as `traceparent`/`tracestate`.
/// Leaves `headers` untouched when no sampled span is active.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let context = Span::current().context();
    let span = context.span();
    let span_context = span.span_context();

    if !span_context.is_valid() {
        return;
    }

    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    );
    if let Ok(value) = traceparent.parse() {
        headers.insert(TRACEPARENT_HEADER, value);
    }

    let tracestate = span_context.trace_state().header();
    if !tracestate.is_empty() {
        if let Ok(value) = tracestate.parse() {
            headers.insert(TRACESTATE_HEADER, value);
        }
    }
}

/// `reqwest::Client` helpers returning builders with trace headers attached.
pub trait TracedClientExt {
    fn traced_get(&self, url: &str) -> reqwest::RequestBuilder;
    fn traced_post(&self, url: &str) -> reqwest::RequestBuilder;
}

fn trace_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    inject_trace_context(&mut headers);
    headers
}

impl TracedClientExt for reqwest::Client {
    fn traced_get(&self, url: &str) -> reqwest::RequestBuilder {
        self.get(url).headers(trace_headers())
    }

    fn traced_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.post(url).headers(trace_headers())
    }
}

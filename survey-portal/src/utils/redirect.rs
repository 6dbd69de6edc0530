//! Building redirect locations that carry query parameters.

/// Accept only same-origin absolute paths as post-auth destinations.
///
/// Rejects protocol-relative (`//host`), backslash tricks and control
/// characters, so a `redirectTo` value can never send the browser off-site.
pub fn sanitize_redirect(candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    if !candidate.starts_with('/')
        || candidate.starts_with("//")
        || candidate.contains('\\')
        || candidate.chars().any(char::is_control)
    {
        return None;
    }
    Some(candidate.to_string())
}

/// Append `params` to `path`, skipping `None` values. The path may already
/// carry a query string.
pub fn with_query(path: &str, params: &[(&str, Option<&str>)]) -> String {
    let present: Vec<(&str, &str)> = params
        .iter()
        .filter_map(|(k, v)| v.map(|v| (*k, v)))
        .collect();
    if present.is_empty() {
        return path.to_string();
    }
    // Encoding a slice of string pairs cannot fail.
    let query = serde_urlencoded::to_string(&present).unwrap_or_default();
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}", path, separator, query)
}

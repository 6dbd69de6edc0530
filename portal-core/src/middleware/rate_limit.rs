use axum::extract::{ConnectInfo, Request};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Limiter keyed by client IP address.
pub type AttemptLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Keys tracked before idle entries are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

/// Allow each client `attempts` requests per `window_seconds`, refilled
/// evenly, with the whole allowance available as an initial burst.
pub fn create_attempt_limiter(attempts: u32, window_seconds: u64) -> AttemptLimiter {
    let burst = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_millis((window_seconds.max(1) * 1000) / u64::from(burst.get()));
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst);

    Arc::new(RateLimiter::dashmap(quota))
}

/// Client address: first `x-forwarded-for` hop, else the peer address when
/// the server was started with connect info.
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok());

    forwarded.or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

/// Spend one attempt for the requesting client. `Err` carries how long the
/// client must wait. Requests without a known client address are not limited.
pub fn check_attempt(limiter: &AttemptLimiter, request: &Request) -> Result<(), Duration> {
    let Some(ip) = client_ip(request) else {
        tracing::warn!(path = %request.uri().path(), "Could not determine client IP for rate limiting");
        return Ok(());
    };

    if limiter.len() > PRUNE_THRESHOLD {
        limiter.retain_recent();
    }

    limiter.check_key(&ip).map_err(|negative| {
        let wait_time = negative.wait_time_from(DefaultClock::default().now());
        tracing::warn!(
            client_ip = %ip,
            path = %request.uri().path(),
            retry_after_secs = wait_time.as_secs(),
            "Credential attempt rate limit hit"
        );
        wait_time
    })
}

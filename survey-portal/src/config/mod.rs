use crate::models::Portal;
use crate::services::wait::WaitPolicy;
use portal_core::error::AppError;
use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

pub const SERVICE_NAME: &str = "survey-portal";

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub portals: PortalSettings,
    pub identity: IdentitySettings,
    pub invites: InviteSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

impl Settings {
    /// Browser-facing absolute URL of `path` (an internal path such as
    /// `/org/auth/callback`) on the hostname that serves `portal`.
    ///
    /// Organization pages are addressed on the organization host without the
    /// `/org` prefix, using the member origin's scheme.
    pub fn portal_url(&self, portal: Portal, path: &str) -> String {
        let member_origin = self.server.public_url.trim_end_matches('/');
        match portal {
            Portal::Member => format!("{}{}", member_origin, path),
            Portal::Organization => {
                let scheme = member_origin
                    .split_once("://")
                    .map_or("https", |(scheme, _)| scheme);
                format!("{}://{}{}", scheme, self.portals.org_host, portal.relative(path))
            }
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Browser-facing origin of the member portal, used in emailed links.
    pub public_url: String,
    #[serde(default)]
    pub secure_cookies: bool,
    #[serde(default = "default_session_idle_hours")]
    pub session_idle_hours: i64,
}

fn default_session_idle_hours() -> i64 {
    24
}

#[derive(Deserialize, Clone)]
pub struct PortalSettings {
    /// Hostname served by the organization portal, e.g. `org.example.com`.
    pub org_host: String,
}

#[derive(Deserialize, Clone)]
pub struct IdentitySettings {
    pub url: String,
    pub api_key: Secret<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Upper bound on waiting for a session after a code exchange.
    #[serde(default = "default_session_wait_ms")]
    pub session_wait_ms: u64,
    #[serde(default = "default_session_poll_ms")]
    pub session_poll_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_session_wait_ms() -> u64 {
    5_000
}

fn default_session_poll_ms() -> u64 {
    250
}

impl IdentitySettings {
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_millis(self.session_wait_ms),
            poll_interval: Duration::from_millis(self.session_poll_ms.max(1)),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct InviteSettings {
    pub signing_secret: Secret<String>,
    /// Invites never expire when unset.
    #[serde(default)]
    pub ttl_days: Option<i64>,
}

impl InviteSettings {
    pub fn ttl(&self) -> Option<chrono::Duration> {
        self.ttl_days.map(chrono::Duration::days)
    }
}

#[derive(Deserialize, Clone)]
pub struct DatabaseSettings {
    /// In-memory storage is used when unset.
    #[serde(default)]
    pub url: Option<Secret<String>>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct TelemetrySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct RateLimitSettings {
    pub sign_in_attempts: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            sign_in_attempts: 20,
            window_seconds: 60,
        }
    }
}

pub fn get_configuration() -> Result<Settings, AppError> {
    portal_core::config::load_settings(SERVICE_NAME)
}

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use chrono::Utc;
use http_body_util::BodyExt;
use secrecy::Secret;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use survey_portal::AppState;
use survey_portal::config::{
    DatabaseSettings, IdentitySettings, InviteSettings, PortalSettings, RateLimitSettings,
    ServerSettings, Settings, TelemetrySettings,
};
use survey_portal::models::{AuthSession, Credentials, Role};
use survey_portal::services::{
    IdentityProvider, InMemoryRepository, PortalError, ProviderTokens, SurveyRepository,
};
use survey_portal::startup::build_app;
use tower::ServiceExt;

pub const MEMBER_HOST: &str = "app.example.com";
pub const ORG_HOST: &str = "org.example.com";
pub const PASSWORD: &str = "correct horse battery";

#[derive(Clone)]
struct Account {
    user_id: String,
    email: String,
    password: String,
    role: Role,
    confirmed: bool,
}

/// In-process identity provider.
#[derive(Default)]
pub struct StubIdentityProvider {
    accounts: Mutex<HashMap<String, Account>>,
    codes: Mutex<HashMap<String, String>>,
    pub sign_up_redirects: Mutex<Vec<String>>,
    /// Simulates a provider that never makes exchanged sessions visible.
    pub withhold_sessions: AtomicBool,
}

impl StubIdentityProvider {
    pub fn add_user(&self, email: &str, role: Role, confirmed: bool) -> String {
        let user_id = format!("user-{}", email.split('@').next().unwrap_or(email));
        self.accounts.lock().unwrap().insert(
            email.to_string(),
            Account {
                user_id: user_id.clone(),
                email: email.to_string(),
                password: PASSWORD.to_string(),
                role,
                confirmed,
            },
        );
        user_id
    }

    pub fn user_id(&self, email: &str) -> Option<String> {
        self.accounts.lock().unwrap().get(email).map(|a| a.user_id.clone())
    }

    /// Mark the email confirmed and return the authorization code the
    /// confirmation link would carry.
    pub fn confirm(&self, email: &str) -> String {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.get_mut(email).expect("unknown account");
        account.confirmed = true;
        let code = format!("code-{}", account.user_id);
        self.codes.lock().unwrap().insert(code.clone(), email.to_string());
        code
    }

    fn session_for(account: &Account) -> AuthSession {
        AuthSession {
            user_id: account.user_id.clone(),
            email: account.email.clone(),
            role: account.role,
            email_confirmed_at: account.confirmed.then(Utc::now),
            access_token: format!("at-{}", account.email),
            refresh_token: None,
            expires_at: None,
        }
    }
}

#[async_trait]
impl IdentityProvider for StubIdentityProvider {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, PortalError> {
        let accounts = self.accounts.lock().unwrap();
        match accounts.get(&credentials.email) {
            Some(account) if account.password == credentials.password => Ok(Self::session_for(account)),
            _ => Err(PortalError::InvalidCredentials),
        }
    }

    async fn sign_up(
        &self,
        credentials: &Credentials,
        role: Role,
        email_redirect_to: &str,
    ) -> Result<Option<AuthSession>, PortalError> {
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.contains_key(&credentials.email) {
            return Err(PortalError::Provider("User already registered".to_string()));
        }
        let user_id = format!(
            "user-{}",
            credentials.email.split('@').next().unwrap_or_default()
        );
        accounts.insert(
            credentials.email.clone(),
            Account {
                user_id,
                email: credentials.email.clone(),
                password: credentials.password.clone(),
                role,
                confirmed: false,
            },
        );
        self.sign_up_redirects
            .lock()
            .unwrap()
            .push(email_redirect_to.to_string());
        Ok(None)
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, PortalError> {
        match self.codes.lock().unwrap().get(code) {
            Some(email) => Ok(ProviderTokens {
                access_token: format!("at-{}", email),
                refresh_token: None,
                expires_in: Some(3600),
            }),
            None => Err(PortalError::CallbackProcessing("unknown code".to_string())),
        }
    }

    async fn fetch_session(&self, tokens: &ProviderTokens) -> Result<Option<AuthSession>, PortalError> {
        if self.withhold_sessions.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let email = tokens.access_token.trim_start_matches("at-");
        Ok(self.accounts.lock().unwrap().get(email).map(Self::session_for))
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), PortalError> {
        Ok(())
    }
}

pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            public_url: format!("https://{}", MEMBER_HOST),
            secure_cookies: false,
            session_idle_hours: 1,
        },
        portals: PortalSettings {
            org_host: ORG_HOST.to_string(),
        },
        identity: IdentitySettings {
            url: "http://identity.invalid".to_string(),
            api_key: Secret::new("test-key".to_string()),
            request_timeout_ms: 1_000,
            session_wait_ms: 300,
            session_poll_ms: 20,
        },
        invites: InviteSettings {
            signing_secret: Secret::new("test-invite-secret".to_string()),
            ttl_days: Some(7),
        },
        database: DatabaseSettings::default(),
        telemetry: TelemetrySettings::default(),
        rate_limit: RateLimitSettings {
            sign_in_attempts: 1_000,
            window_seconds: 60,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub repository: Arc<InMemoryRepository>,
    pub identity: Arc<StubIdentityProvider>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with(test_settings())
    }

    pub fn spawn_with(settings: Settings) -> Self {
        let repository = Arc::new(InMemoryRepository::new());
        let identity = Arc::new(StubIdentityProvider::default());
        let state = AppState::new(settings, identity.clone(), repository.clone());
        let router = build_app(state.clone());
        Self {
            router,
            state,
            repository,
            identity,
        }
    }

    /// A fresh browser context (own cookie jar) on `host`.
    pub fn browser(&self, host: &str) -> Browser {
        Browser {
            router: self.router.clone(),
            host: host.to_string(),
            cookie: None,
            client_ip: None,
        }
    }

    pub async fn signed_in(&self, host: &str, email: &str) -> Browser {
        let mut browser = self.browser(host);
        let response = browser.sign_in(email, PASSWORD).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        browser
    }

    pub fn repository(&self) -> &dyn SurveyRepository {
        self.repository.as_ref()
    }
}

pub struct Browser {
    router: Router,
    host: String,
    cookie: Option<String>,
    client_ip: Option<String>,
}

impl Browser {
    /// Send requests as if from `ip`, via `x-forwarded-for`.
    pub fn from_ip(mut self, ip: &str) -> Self {
        self.client_ip = Some(ip.to_string());
        self
    }

    pub async fn send(&mut self, builder: axum::http::request::Builder, body: Body) -> Response<Body> {
        let mut builder = builder.header(header::HOST, &self.host);
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        if let Some(ip) = &self.client_ip {
            builder = builder.header("x-forwarded-for", ip);
        }
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        if let Some(set_cookie) = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
        {
            let pair = set_cookie.split(';').next().unwrap_or_default().to_string();
            self.cookie = match pair.split_once('=') {
                Some((_, value)) if !value.is_empty() => Some(pair),
                _ => None,
            };
        }
        response
    }

    pub async fn get(&mut self, path: &str) -> Response<Body> {
        self.send(Request::get(path), Body::empty()).await
    }

    pub async fn post_form(&mut self, path: &str, fields: &[(&str, &str)]) -> Response<Body> {
        let body = serde_urlencoded::to_string(fields).unwrap();
        self.send(
            Request::post(path).header(header::CONTENT_TYPE, "application/x-www-form-urlencoded"),
            Body::from(body),
        )
        .await
    }

    pub async fn post_json(&mut self, path: &str, value: serde_json::Value) -> Response<Body> {
        self.send(
            Request::post(path).header(header::CONTENT_TYPE, "application/json"),
            Body::from(value.to_string()),
        )
        .await
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Response<Body> {
        // The organization host maps this onto /org/auth.
        self.post_form("/auth", &[("email", email), ("password", password)]).await
    }
}

/// Redirect target with the query string percent-decoded.
pub fn location(response: &Response<Body>) -> String {
    let raw = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_else(|| panic!("no Location header (status {})", response.status()));

    match raw.split_once('?') {
        None => raw.to_string(),
        Some((path, query)) => {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap();
            let decoded: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("{}?{}", path, decoded.join("&"))
        }
    }
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

//! Client side of the external identity provider.
//!
//! The provider issues sessions, verifies credentials and stores user
//! metadata (role, email confirmation). This module only speaks its REST API.

use crate::config::IdentitySettings;
use crate::models::{AuthSession, Credentials, Role};
use crate::services::error::PortalError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use portal_core::observability::TracedClientExt;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;

/// Tokens returned by a credential or authorization-code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Password sign-in. Rejected credentials yield `InvalidCredentials`; the
    /// account's role is reported, never checked.
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, PortalError>;

    /// Register an account. Returns a session when the provider signs the user
    /// in straight away, `None` when it first sends a confirmation email whose
    /// link leads back to `email_redirect_to`.
    async fn sign_up(
        &self,
        credentials: &Credentials,
        role: Role,
        email_redirect_to: &str,
    ) -> Result<Option<AuthSession>, PortalError>;

    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, PortalError>;

    /// Session metadata for `tokens`, or `None` while the provider has not yet
    /// made the session visible.
    async fn fetch_session(&self, tokens: &ProviderTokens) -> Result<Option<AuthSession>, PortalError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), PortalError>;
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    email: String,
    #[serde(default)]
    email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    #[serde(flatten)]
    tokens: ProviderTokens,
    user: UserPayload,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpPayload {
    Session(SessionPayload),
    User(UserPayload),
}

/// Build a session from provider tokens and user record. A missing or unknown
/// role falls back to `MEMBER`, the least privileged account type.
pub(crate) fn session_from_parts(tokens: ProviderTokens, user: UserPayloadParts) -> AuthSession {
    let role = user
        .role
        .as_deref()
        .and_then(|r| r.parse::<Role>().ok())
        .unwrap_or(Role::Member);

    AuthSession {
        user_id: user.id,
        email: user.email,
        role,
        email_confirmed_at: user.email_confirmed_at,
        expires_at: tokens.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    }
}

/// Provider-agnostic view of a user record.
#[derive(Debug, Clone)]
pub(crate) struct UserPayloadParts {
    pub id: String,
    pub email: String,
    pub role: Option<String>,
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

impl From<UserPayload> for UserPayloadParts {
    fn from(u: UserPayload) -> Self {
        Self {
            id: u.id,
            email: u.email,
            role: u.user_metadata.role,
            email_confirmed_at: u.email_confirmed_at,
        }
    }
}

pub struct HttpIdentityProvider {
    client: Client,
    settings: IdentitySettings,
}

impl HttpIdentityProvider {
    pub fn new(settings: IdentitySettings) -> Result<Self, PortalError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(settings.request_timeout_ms))
            .build()
            .map_err(|e| PortalError::Provider(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, PortalError> {
        let url = self.url(path);
        self.client
            .traced_post(&url)
            .header("apikey", self.settings.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send POST request to {}: {}", url, e);
                PortalError::Provider(format!("HTTP request failed: {}", e))
            })
    }
}

async fn unexpected(response: reqwest::Response, action: &str) -> PortalError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::error!(%status, body = %body, "Identity provider rejected {}", action);
    PortalError::Provider(format!("{} failed with status {}", action, status))
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, PortalError> {
        let response = self
            .post(
                "/token?grant_type=password",
                serde_json::json!({
                    "email": credentials.email,
                    "password": credentials.password,
                }),
            )
            .await?;

        match response.status() {
            s if s.is_success() => {
                let payload: SessionPayload = response
                    .json()
                    .await
                    .map_err(|e| PortalError::Provider(format!("Malformed session payload: {}", e)))?;
                Ok(session_from_parts(payload.tokens, payload.user.into()))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Err(PortalError::InvalidCredentials),
            _ => Err(unexpected(response, "sign-in").await),
        }
    }

    async fn sign_up(
        &self,
        credentials: &Credentials,
        role: Role,
        email_redirect_to: &str,
    ) -> Result<Option<AuthSession>, PortalError> {
        let response = self
            .post(
                "/signup",
                serde_json::json!({
                    "email": credentials.email,
                    "password": credentials.password,
                    "data": { "role": role.as_str() },
                    "redirect_to": email_redirect_to,
                }),
            )
            .await?;

        if !response.status().is_success() {
            return Err(unexpected(response, "sign-up").await);
        }

        let payload: SignUpPayload = response
            .json()
            .await
            .map_err(|e| PortalError::Provider(format!("Malformed sign-up payload: {}", e)))?;

        Ok(match payload {
            SignUpPayload::Session(s) => Some(session_from_parts(s.tokens, s.user.into())),
            SignUpPayload::User(_) => None,
        })
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, PortalError> {
        let response = self
            .post(
                "/token?grant_type=authorization_code",
                serde_json::json!({ "auth_code": code }),
            )
            .await
            .map_err(|e| PortalError::CallbackProcessing(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(%status, "Authorization code exchange rejected");
            return Err(PortalError::CallbackProcessing(format!(
                "code exchange failed with status {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PortalError::CallbackProcessing(format!("Malformed token payload: {}", e)))
    }

    async fn fetch_session(&self, tokens: &ProviderTokens) -> Result<Option<AuthSession>, PortalError> {
        let url = self.url("/user");
        let response = self
            .client
            .traced_get(&url)
            .header("apikey", self.settings.api_key.expose_secret())
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|e| PortalError::Provider(format!("HTTP request failed: {}", e)))?;

        match response.status() {
            s if s.is_success() => {
                let user: UserPayload = response
                    .json()
                    .await
                    .map_err(|e| PortalError::Provider(format!("Malformed user payload: {}", e)))?;
                Ok(Some(session_from_parts(tokens.clone(), user.into())))
            }
            // Not yet propagated on the provider side.
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => Ok(None),
            _ => Err(unexpected(response, "user lookup").await),
        }
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), PortalError> {
        let url = self.url("/logout");
        let response = self
            .client
            .traced_post(&url)
            .header("apikey", self.settings.api_key.expose_secret())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| PortalError::Provider(format!("HTTP request failed: {}", e)))?;

        if response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED {
            Ok(())
        } else {
            Err(unexpected(response, "sign-out").await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_role_falls_back_to_member() {
        let session = session_from_parts(
            ProviderTokens {
                access_token: "a".to_string(),
                refresh_token: None,
                expires_in: Some(3600),
            },
            UserPayloadParts {
                id: "u1".to_string(),
                email: "u1@example.com".to_string(),
                role: Some("superuser".to_string()),
                email_confirmed_at: None,
            },
        );
        assert_eq!(session.role, Role::Member);
        assert!(session.expires_at.is_some());
    }

    #[test]
    fn sign_up_payload_distinguishes_session_from_bare_user() {
        let bare: SignUpPayload = serde_json::from_value(serde_json::json!({
            "id": "u1", "email": "u1@example.com"
        }))
        .unwrap();
        assert!(matches!(bare, SignUpPayload::User(_)));

        let with_session: SignUpPayload = serde_json::from_value(serde_json::json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": {
                "id": "u1",
                "email": "u1@example.com",
                "email_confirmed_at": "2026-01-01T00:00:00Z",
                "user_metadata": { "role": "LEADER" }
            }
        }))
        .unwrap();
        match with_session {
            SignUpPayload::Session(s) => {
                let session = session_from_parts(s.tokens, s.user.into());
                assert_eq!(session.role, Role::Leader);
                assert!(session.is_confirmed());
            }
            SignUpPayload::User(_) => panic!("expected a session payload"),
        }
    }
}

//! Invite tokens and their hand-off through the authentication detour.
//!
//! A leader shares `/invite?invite=<token>&invite_name=<team>`. The token is
//! parked in the browser-context session, survives sign-up, email confirmation
//! and the provider callback, and is redeemed into a team membership exactly
//! once a confirmed session exists.

use crate::models::{AuthSession, InviteClaims, PendingInvite, TeamMembership};
use crate::services::error::PortalError;
use crate::services::repository::{EnsuredMembership, SurveyRepository};
use crate::utils::{crypto, redirect::with_query};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use secrecy::Secret;
use std::sync::Arc;
use tower_sessions::Session;
use uuid::Uuid;

pub const PENDING_INVITE_KEY: &str = "pending_invite";

/// Issues and verifies `<base64url claims>.<hex hmac>` invite tokens.
#[derive(Clone)]
pub struct InviteSigner {
    secret: Secret<String>,
    ttl: Option<Duration>,
}

impl InviteSigner {
    pub fn new(secret: Secret<String>, ttl: Option<Duration>) -> Self {
        Self { secret, ttl }
    }

    pub fn issue(&self, team_id: Uuid, now: DateTime<Utc>) -> Result<String, PortalError> {
        let claims = InviteClaims {
            team_id,
            exp: self.ttl.map(|ttl| (now + ttl).timestamp()),
        };
        let body = serde_json::to_vec(&claims)
            .map_err(|e| PortalError::Storage(anyhow::anyhow!("Failed to encode invite: {}", e)))?;
        let encoded = URL_SAFE_NO_PAD.encode(body);
        let signature = crypto::sign(&self.secret, encoded.as_bytes())
            .map_err(|e| PortalError::Storage(anyhow::anyhow!("Failed to sign invite: {}", e)))?;
        Ok(format!("{}.{}", encoded, signature))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<InviteClaims, PortalError> {
        let (encoded, signature) = token
            .split_once('.')
            .ok_or_else(|| PortalError::InvalidInvite("malformed token".to_string()))?;

        if !crypto::verify(&self.secret, encoded.as_bytes(), signature) {
            return Err(PortalError::InvalidInvite("bad signature".to_string()));
        }

        let body = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| PortalError::InvalidInvite("malformed token".to_string()))?;
        let claims: InviteClaims = serde_json::from_slice(&body)
            .map_err(|_| PortalError::InvalidInvite("malformed claims".to_string()))?;

        if claims.exp.is_some_and(|exp| exp <= now.timestamp()) {
            return Err(PortalError::InvalidInvite("expired".to_string()));
        }
        Ok(claims)
    }
}

/// Shareable landing URL for an invite.
pub fn invite_link(public_url: &str, token: &str, team_name: &str) -> String {
    with_query(
        &format!("{}/invite", public_url.trim_end_matches('/')),
        &[("invite", Some(token)), ("invite_name", Some(team_name))],
    )
}

pub struct InviteLifecycle {
    store: Session,
    repository: Arc<dyn SurveyRepository>,
    signer: InviteSigner,
}

impl InviteLifecycle {
    pub fn new(store: Session, repository: Arc<dyn SurveyRepository>, signer: InviteSigner) -> Self {
        Self {
            store,
            repository,
            signer,
        }
    }

    /// Park an invite for this browser context, replacing any previous one.
    pub async fn store_pending_invite(&self, token: &str, team_name: &str) -> Result<(), PortalError> {
        let pending = PendingInvite {
            token: token.to_string(),
            team_name: team_name.to_string(),
            stored_at: Utc::now(),
        };
        self.store.insert(PENDING_INVITE_KEY, &pending).await?;
        tracing::debug!(team_name = %team_name, "Pending invite stored");
        Ok(())
    }

    pub async fn pending_invite(&self) -> Result<Option<PendingInvite>, PortalError> {
        Ok(self.store.get::<PendingInvite>(PENDING_INVITE_KEY).await?)
    }

    pub async fn discard_pending_invite(&self) -> Result<(), PortalError> {
        self.store.remove::<PendingInvite>(PENDING_INVITE_KEY).await?;
        Ok(())
    }

    /// Turn the pending invite into a membership for `session`'s user.
    ///
    /// Returns `Ok(None)` when nothing is pending. An existing membership is
    /// returned untouched, so an `answered` row is never downgraded. The token
    /// is discarded after any definitive outcome and kept when there is no
    /// session or storage failed, so the attempt can be repeated.
    pub async fn redeem_pending_invite(
        &self,
        session: Option<&AuthSession>,
    ) -> Result<Option<TeamMembership>, PortalError> {
        let session = session.ok_or(PortalError::NoActiveSession)?;
        let Some(pending) = self.pending_invite().await? else {
            return Ok(None);
        };

        let result = self.redeem(session, &pending).await;
        match &result {
            Ok(_) | Err(PortalError::InvalidInvite(_)) | Err(PortalError::TeamNotFound) => {
                self.discard_pending_invite().await?;
            }
            Err(_) => {}
        }

        let outcome = match &result {
            Ok(EnsuredMembership::Created(_)) => "created",
            Ok(EnsuredMembership::Existing(_)) => "existing",
            Err(e) => e.error_code(),
        };
        counter!("invite_redemptions_total", "outcome" => outcome).increment(1);

        match result {
            Ok(ensured) => {
                tracing::info!(
                    user_id = %session.user_id,
                    team_id = %ensured.membership().team_id,
                    outcome,
                    "Invite redeemed"
                );
                Ok(Some(ensured.into_membership()))
            }
            Err(e) => {
                tracing::warn!(user_id = %session.user_id, team_name = %pending.team_name, error = %e, "Invite redemption failed");
                Err(e)
            }
        }
    }

    async fn redeem(
        &self,
        session: &AuthSession,
        pending: &PendingInvite,
    ) -> Result<EnsuredMembership, PortalError> {
        let now = Utc::now();
        let claims = self.signer.verify(&pending.token, now)?;
        self.repository
            .find_team(claims.team_id)
            .await?
            .ok_or(PortalError::TeamNotFound)?;
        self.repository
            .ensure_membership(TeamMembership::invited(
                session.user_id.clone(),
                claims.team_id,
                now,
            ))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MembershipStatus, Role, SurveyStep, Team};
    use crate::services::repository::{InMemoryRepository, StepCommit};
    use tower_sessions::MemoryStore;

    fn signer() -> InviteSigner {
        InviteSigner::new(Secret::new("test-signing-secret".to_string()), Some(Duration::days(7)))
    }

    fn member(user_id: &str) -> AuthSession {
        AuthSession {
            user_id: user_id.to_string(),
            email: format!("{}@example.com", user_id),
            role: Role::Member,
            email_confirmed_at: Some(Utc::now()),
            access_token: "token".to_string(),
            refresh_token: None,
            expires_at: None,
        }
    }

    async fn setup() -> (InviteLifecycle, Arc<InMemoryRepository>, Team, Session) {
        let repo = Arc::new(InMemoryRepository::new());
        let team = Team::new("Team Alpha".to_string(), "leader-1".to_string());
        repo.insert_team(&team).await.unwrap();
        let store = Session::new(None, Arc::new(MemoryStore::default()), None);
        let lifecycle = InviteLifecycle::new(store.clone(), repo.clone(), signer());
        (lifecycle, repo, team, store)
    }

    #[test]
    fn tokens_verify_and_reject_tampering() {
        let now = Utc::now();
        let team = Uuid::new_v4();
        let token = signer().issue(team, now).unwrap();
        assert_eq!(signer().verify(&token, now).unwrap().team_id, team);

        let other = InviteSigner::new(Secret::new("other".to_string()), None);
        assert!(matches!(other.verify(&token, now), Err(PortalError::InvalidInvite(_))));

        let forged_body = URL_SAFE_NO_PAD.encode(format!(r#"{{"team_id":"{}"}}"#, Uuid::new_v4()));
        let (_, sig) = token.split_once('.').unwrap();
        let forged = format!("{}.{}", forged_body, sig);
        assert!(matches!(signer().verify(&forged, now), Err(PortalError::InvalidInvite(_))));
        assert!(matches!(signer().verify("garbage", now), Err(PortalError::InvalidInvite(_))));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let issued = Utc::now() - Duration::days(8);
        let token = signer().issue(Uuid::new_v4(), issued).unwrap();
        assert!(matches!(
            signer().verify(&token, Utc::now()),
            Err(PortalError::InvalidInvite(reason)) if reason == "expired"
        ));
    }

    #[test]
    fn invite_link_carries_both_parameters() {
        let link = invite_link("https://app.example.com/", "abc.def", "Team Alpha");
        assert_eq!(
            link,
            "https://app.example.com/invite?invite=abc.def&invite_name=Team+Alpha"
        );
    }

    #[tokio::test]
    async fn redemption_creates_membership_and_clears_token() {
        let (lifecycle, repo, team, _) = setup().await;
        let token = signer().issue(team.id, Utc::now()).unwrap();
        lifecycle.store_pending_invite(&token, &team.name).await.unwrap();

        let membership = lifecycle
            .redeem_pending_invite(Some(&member("u1")))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(membership.team_id, team.id);
        assert_eq!(membership.status, MembershipStatus::Invited);
        assert!(lifecycle.pending_invite().await.unwrap().is_none());
        assert!(repo.find_membership("u1", team.id).await.unwrap().is_some());

        // Nothing left to redeem.
        assert_eq!(lifecycle.redeem_pending_invite(Some(&member("u1"))).await.unwrap(), None);
    }

    #[tokio::test]
    async fn answered_membership_is_never_downgraded() {
        let (lifecycle, repo, team, _) = setup().await;
        repo.ensure_membership(TeamMembership::invited("u1".into(), team.id, Utc::now()))
            .await
            .unwrap();
        let mut progress = crate::models::SurveyProgress::new("u1".into(), team.id, Utc::now());
        for step in crate::models::SURVEY_STEPS {
            let expected = progress.current_step;
            let next = progress.advance(step, Utc::now()).unwrap();
            repo.commit_step(StepCommit {
                expected_step: expected,
                submitted: step,
                progress: &next,
                payload: &serde_json::Value::Null,
            })
            .await
            .unwrap();
            progress = next;
        }
        assert_eq!(progress.current_step, SurveyStep::Completed);

        let token = signer().issue(team.id, Utc::now()).unwrap();
        lifecycle.store_pending_invite(&token, &team.name).await.unwrap();
        let membership = lifecycle
            .redeem_pending_invite(Some(&member("u1")))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(membership.status, MembershipStatus::Answered);
        assert!(lifecycle.pending_invite().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn without_session_the_token_is_kept() {
        let (lifecycle, _, team, _) = setup().await;
        let token = signer().issue(team.id, Utc::now()).unwrap();
        lifecycle.store_pending_invite(&token, &team.name).await.unwrap();

        let err = lifecycle.redeem_pending_invite(None).await.unwrap_err();

        assert!(matches!(err, PortalError::NoActiveSession));
        assert_eq!(lifecycle.pending_invite().await.unwrap().unwrap().token, token);
    }

    #[tokio::test]
    async fn invalid_token_is_discarded() {
        let (lifecycle, repo, team, _) = setup().await;
        lifecycle.store_pending_invite("forged.token", &team.name).await.unwrap();

        let err = lifecycle.redeem_pending_invite(Some(&member("u1"))).await.unwrap_err();

        assert!(matches!(err, PortalError::InvalidInvite(_)));
        assert!(lifecycle.pending_invite().await.unwrap().is_none());
        assert!(repo.list_memberships("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storing_again_overwrites() {
        let (lifecycle, _, _, store) = setup().await;
        lifecycle.store_pending_invite("first", "One").await.unwrap();
        lifecycle.store_pending_invite("second", "Two").await.unwrap();

        let pending = store.get::<PendingInvite>(PENDING_INVITE_KEY).await.unwrap().unwrap();
        assert_eq!(pending.token, "second");
        assert_eq!(pending.team_name, "Two");
    }
}

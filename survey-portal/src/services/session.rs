//! Session state for a browser context, backed by the cookie-keyed session
//! store, plus process-wide change notifications.

use crate::models::{AuthSession, Credentials, Role};
use crate::services::error::PortalError;
use crate::services::identity::{IdentityProvider, ProviderTokens};
use crate::services::wait::{WaitError, WaitPolicy, poll_until};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_sessions::Session;

pub const AUTH_SESSION_KEY: &str = "auth_session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    SignedIn { user_id: String, role: Role },
    /// Same user, different guard-relevant metadata (e.g. email confirmed).
    Updated { user_id: String },
    SignedOut { user_id: String },
}

/// Decide whether going from `previous` to `next` is an actual transition.
pub fn classify_change(previous: Option<&AuthSession>, next: Option<&AuthSession>) -> Option<SessionChange> {
    match (previous, next) {
        (None, None) => None,
        (None, Some(n)) => Some(SessionChange::SignedIn {
            user_id: n.user_id.clone(),
            role: n.role,
        }),
        (Some(p), None) => Some(SessionChange::SignedOut {
            user_id: p.user_id.clone(),
        }),
        (Some(p), Some(n)) if p.user_id != n.user_id => Some(SessionChange::SignedIn {
            user_id: n.user_id.clone(),
            role: n.role,
        }),
        (Some(p), Some(n)) if !p.same_state(n) => Some(SessionChange::Updated {
            user_id: n.user_id.clone(),
        }),
        (Some(_), Some(_)) => None,
    }
}

/// Fan-out of session transitions to in-process listeners.
#[derive(Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionChange>,
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.sender.subscribe()
    }

    pub fn publish(&self, change: SessionChange) {
        // No listeners is fine.
        let _ = self.sender.send(change);
    }

    /// Run `callback` for every transition until the returned listener is dropped.
    pub fn on_session_change<F>(&self, callback: F) -> SessionListener
    where
        F: Fn(SessionChange) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(change) => callback(change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session change listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        SessionListener { handle }
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct SessionListener {
    handle: JoinHandle<()>,
}

impl Drop for SessionListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Session state of one browser context.
pub struct SessionResolver {
    store: Session,
    identity: Arc<dyn IdentityProvider>,
    events: SessionEvents,
    wait: WaitPolicy,
}

impl SessionResolver {
    pub fn new(
        store: Session,
        identity: Arc<dyn IdentityProvider>,
        events: SessionEvents,
        wait: WaitPolicy,
    ) -> Self {
        Self {
            store,
            identity,
            events,
            wait,
        }
    }

    /// Cached session, or `None`. An expired session is dropped on read.
    pub async fn get_session(&self) -> Result<Option<AuthSession>, PortalError> {
        let cached = self.store.get::<AuthSession>(AUTH_SESSION_KEY).await?;
        match cached {
            Some(session) if session.is_expired(Utc::now()) => {
                tracing::info!(user_id = %session.user_id, "Cached session expired");
                self.replace(None).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, PortalError> {
        let session = self.identity.sign_in(credentials).await?;
        self.store.cycle_id().await?;
        self.replace(Some(session.clone())).await?;

        tracing::info!(
            user_id = %session.user_id,
            role = %session.role,
            confirmed = session.is_confirmed(),
            "User signed in"
        );
        Ok(session)
    }

    /// Register through the provider; caches the session if one is issued.
    pub async fn sign_up(
        &self,
        credentials: &Credentials,
        role: Role,
        email_redirect_to: &str,
    ) -> Result<Option<AuthSession>, PortalError> {
        let issued = self
            .identity
            .sign_up(credentials, role, email_redirect_to)
            .await?;
        if let Some(session) = &issued {
            self.store.cycle_id().await?;
            self.replace(Some(session.clone())).await?;
        }
        tracing::info!(role = %role, session_issued = issued.is_some(), "User signed up");
        Ok(issued)
    }

    /// Exchange an authorization code and wait, bounded by the policy, for the
    /// provider to expose the resulting session.
    pub async fn complete_code_exchange(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<AuthSession, PortalError> {
        let tokens = self.identity.exchange_code(code).await?;
        let session = self.await_session(&tokens, cancel).await?;
        self.store.cycle_id().await?;
        self.replace(Some(session.clone())).await?;

        tracing::info!(
            user_id = %session.user_id,
            role = %session.role,
            confirmed = session.is_confirmed(),
            "Session established from authorization code"
        );
        Ok(session)
    }

    async fn await_session(
        &self,
        tokens: &ProviderTokens,
        cancel: &CancellationToken,
    ) -> Result<AuthSession, PortalError> {
        let identity = self.identity.clone();
        match poll_until(self.wait, cancel, || identity.fetch_session(tokens)).await {
            Ok(session) => Ok(session),
            Err(WaitError::TimedOut) => {
                tracing::warn!(timeout = ?self.wait.timeout, "Session did not become available in time");
                Err(PortalError::SessionTimeout)
            }
            Err(WaitError::Cancelled) => Err(PortalError::SessionTimeout),
            Err(WaitError::Failed(e)) => Err(PortalError::CallbackProcessing(e.to_string())),
        }
    }

    /// Re-read user metadata from the provider (e.g. to pick up a confirmation
    /// that happened in another tab).
    pub async fn refresh(&self) -> Result<Option<AuthSession>, PortalError> {
        let Some(current) = self.get_session().await? else {
            return Ok(None);
        };
        let tokens = ProviderTokens {
            access_token: current.access_token.clone(),
            refresh_token: current.refresh_token.clone(),
            expires_in: None,
        };
        match self.identity.fetch_session(&tokens).await? {
            Some(mut fresh) => {
                fresh.expires_at = current.expires_at;
                self.replace(Some(fresh.clone())).await?;
                Ok(Some(fresh))
            }
            None => Ok(Some(current)),
        }
    }

    /// Clear everything held for this browser context, including any pending
    /// invite. Provider-side revocation is best effort.
    pub async fn sign_out(&self) -> Result<(), PortalError> {
        let previous = self.store.get::<AuthSession>(AUTH_SESSION_KEY).await?;

        if let Some(session) = &previous {
            if let Err(e) = self.identity.sign_out(&session.access_token).await {
                tracing::error!(user_id = %session.user_id, error = %e, "Failed to revoke session during sign-out");
            }
        }

        self.store.flush().await?;

        if let Some(change) = classify_change(previous.as_ref(), None) {
            tracing::info!(?change, "User signed out");
            self.events.publish(change);
        }
        Ok(())
    }

    async fn replace(&self, next: Option<AuthSession>) -> Result<(), PortalError> {
        let previous = self.store.get::<AuthSession>(AUTH_SESSION_KEY).await?;
        match &next {
            Some(session) => self.store.insert(AUTH_SESSION_KEY, session).await?,
            None => {
                self.store.remove::<AuthSession>(AUTH_SESSION_KEY).await?;
            }
        }
        if let Some(change) = classify_change(previous.as_ref(), next.as_ref()) {
            self.events.publish(change);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::identity::ProviderTokens;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower_sessions::MemoryStore;

    fn session(user_id: &str, confirmed: bool) -> AuthSession {
        AuthSession {
            user_id: user_id.to_string(),
            email: format!("{}@example.com", user_id),
            role: Role::Member,
            email_confirmed_at: confirmed.then(Utc::now),
            access_token: format!("token-{}", user_id),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Provider whose session becomes visible after `visible_after` lookups.
    struct SlowProvider {
        lookups: AtomicUsize,
        visible_after: usize,
        revoked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IdentityProvider for SlowProvider {
        async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, PortalError> {
            if credentials.password == "correct horse" {
                Ok(session("u1", true))
            } else {
                Err(PortalError::InvalidCredentials)
            }
        }

        async fn sign_up(&self, _: &Credentials, _: Role, _: &str) -> Result<Option<AuthSession>, PortalError> {
            Ok(None)
        }

        async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, PortalError> {
            if code == "good" {
                Ok(ProviderTokens {
                    access_token: "token-u1".to_string(),
                    refresh_token: None,
                    expires_in: None,
                })
            } else {
                Err(PortalError::CallbackProcessing("bad code".to_string()))
            }
        }

        async fn fetch_session(&self, _: &ProviderTokens) -> Result<Option<AuthSession>, PortalError> {
            let n = self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok((n >= self.visible_after).then(|| session("u1", true)))
        }

        async fn sign_out(&self, access_token: &str) -> Result<(), PortalError> {
            self.revoked.lock().unwrap().push(access_token.to_string());
            Ok(())
        }
    }

    fn resolver(visible_after: usize) -> (SessionResolver, Session, Arc<SlowProvider>, SessionEvents) {
        let store = Session::new(None, Arc::new(MemoryStore::default()), None);
        let provider = Arc::new(SlowProvider {
            lookups: AtomicUsize::new(0),
            visible_after,
            revoked: Mutex::new(Vec::new()),
        });
        let events = SessionEvents::default();
        let resolver = SessionResolver::new(
            store.clone(),
            provider.clone(),
            events.clone(),
            WaitPolicy {
                timeout: Duration::from_secs(5),
                poll_interval: Duration::from_millis(200),
            },
        );
        (resolver, store, provider, events)
    }

    #[test]
    fn classify_only_reports_real_transitions() {
        let a = session("a", false);
        let mut a_rotated = a.clone();
        a_rotated.access_token = "rotated".to_string();
        let a_confirmed = session("a", true);
        let b = session("b", true);

        assert_eq!(classify_change(None, None), None);
        assert_eq!(classify_change(Some(&a), Some(&a_rotated)), None);
        assert!(matches!(classify_change(None, Some(&a)), Some(SessionChange::SignedIn { .. })));
        assert!(matches!(
            classify_change(Some(&a), Some(&a_confirmed)),
            Some(SessionChange::Updated { .. })
        ));
        assert!(matches!(
            classify_change(Some(&a), Some(&b)),
            Some(SessionChange::SignedIn { user_id, .. }) if user_id == "b"
        ));
        assert!(matches!(classify_change(Some(&a), None), Some(SessionChange::SignedOut { .. })));
    }

    #[tokio::test]
    async fn sign_in_caches_session_and_notifies_once() {
        let (resolver, _, _, events) = resolver(0);
        let mut rx = events.subscribe();
        let creds = Credentials {
            email: "u1@example.com".to_string(),
            password: "correct horse".to_string(),
        };

        resolver.sign_in(&creds).await.unwrap();
        resolver.sign_in(&creds).await.unwrap();

        assert!(matches!(rx.try_recv(), Ok(SessionChange::SignedIn { .. })));
        assert!(rx.try_recv().is_err());
        assert_eq!(resolver.get_session().await.unwrap().unwrap().user_id, "u1");
    }

    #[tokio::test]
    async fn rejected_credentials_leave_no_session() {
        let (resolver, _, _, _) = resolver(0);
        let err = resolver
            .sign_in(&Credentials {
                email: "u1@example.com".to_string(),
                password: "wrong".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidCredentials));
        assert!(resolver.get_session().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn code_exchange_waits_for_propagation() {
        let (resolver, _, provider, _) = resolver(3);
        let session = resolver
            .complete_code_exchange("good", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.user_id, "u1");
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn code_exchange_times_out_instead_of_hanging() {
        let (resolver, _, _, _) = resolver(usize::MAX);
        let err = resolver
            .complete_code_exchange("good", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::SessionTimeout));
        assert!(resolver.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_out_clears_session_and_pending_invite() {
        let (resolver, store, provider, _) = resolver(0);
        resolver
            .sign_in(&Credentials {
                email: "u1@example.com".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap();
        store.insert("pending_invite", "token").await.unwrap();

        resolver.sign_out().await.unwrap();

        assert!(resolver.get_session().await.unwrap().is_none());
        assert!(store.get::<String>("pending_invite").await.unwrap().is_none());
        assert_eq!(provider.revoked.lock().unwrap().as_slice(), ["token-u1"]);
    }

    #[tokio::test]
    async fn listener_receives_changes() {
        let events = SessionEvents::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _listener = events.on_session_change(move |change| sink.lock().unwrap().push(change));

        events.publish(SessionChange::SignedOut {
            user_id: "u1".to_string(),
        });

        for _ in 0..50 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

use config::Settings;
use metrics_exporter_prometheus::PrometheusHandle;
use middleware::host::HostRouting;
use services::{
    IdentityProvider, InviteLifecycle, InviteSigner, SessionEvents, SessionResolver,
    SurveyProgressTracker, SurveyRepository, WaitPolicy,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_sessions::Session;

/// Shared application state: settings and long-lived collaborators.
///
/// Per-browser-context services are built per request from the request's
/// cookie session.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub identity: Arc<dyn IdentityProvider>,
    pub repository: Arc<dyn SurveyRepository>,
    pub session_events: SessionEvents,
    pub invite_signer: InviteSigner,
    pub wait_policy: WaitPolicy,
    pub metrics: Option<PrometheusHandle>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        settings: Settings,
        identity: Arc<dyn IdentityProvider>,
        repository: Arc<dyn SurveyRepository>,
    ) -> Self {
        let invite_signer = InviteSigner::new(
            settings.invites.signing_secret.clone(),
            settings.invites.ttl(),
        );
        let wait_policy = settings.identity.wait_policy();
        Self {
            settings: Arc::new(settings),
            identity,
            repository,
            session_events: SessionEvents::default(),
            invite_signer,
            wait_policy,
            metrics: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn host_routing(&self) -> HostRouting {
        HostRouting::new(&self.settings.portals.org_host)
            .with_member_origin(&self.settings.server.public_url)
    }

    pub fn resolver(&self, store: Session) -> SessionResolver {
        SessionResolver::new(
            store,
            self.identity.clone(),
            self.session_events.clone(),
            self.wait_policy,
        )
    }

    pub fn invites(&self, store: Session) -> InviteLifecycle {
        InviteLifecycle::new(store, self.repository.clone(), self.invite_signer.clone())
    }

    pub fn tracker(&self) -> SurveyProgressTracker {
        SurveyProgressTracker::new(self.repository.clone())
    }
}

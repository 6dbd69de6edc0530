use dotenvy::dotenv;
use portal_core::middleware::metrics::install_recorder;
use portal_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use survey_portal::AppState;
use survey_portal::config::{SERVICE_NAME, get_configuration};
use survey_portal::services::session::SessionChange;
use survey_portal::services::{HttpIdentityProvider, InMemoryRepository, PgRepository, SurveyRepository};
use survey_portal::startup::build_app;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    init_tracing(
        SERVICE_NAME,
        &configuration.telemetry.log_level,
        configuration.telemetry.otlp_endpoint.as_deref(),
    );

    let metrics_handle = install_recorder()?;

    let identity = Arc::new(HttpIdentityProvider::new(configuration.identity.clone())?);

    let repository: Arc<dyn SurveyRepository> = if configuration.database.url.is_some() {
        let pg = PgRepository::connect(&configuration.database).await?;
        pg.run_migrations().await?;
        Arc::new(pg)
    } else {
        warn!("database.url not set; using in-memory storage");
        Arc::new(InMemoryRepository::new())
    };

    let shutdown = CancellationToken::new();
    let address = format!("{}:{}", configuration.server.host, configuration.server.port);

    let state = AppState::new(configuration, identity, repository)
        .with_metrics(metrics_handle)
        .with_shutdown(shutdown.clone());
    let _session_audit = state.session_events.on_session_change(|change| {
        let kind = match &change {
            SessionChange::SignedIn { .. } => "signed_in",
            SessionChange::Updated { .. } => "updated",
            SessionChange::SignedOut { .. } => "signed_out",
        };
        metrics::counter!("session_changes_total", "kind" => kind).increment(1);
        info!(?change, "Session state changed");
    });
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
        tracing::error!("Failed to bind TCP listener to {}: {}", address, e);
        anyhow::anyhow!("Failed to bind to address {}: {}", address, e)
    })?;

    info!("Starting {} on {}", SERVICE_NAME, address);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .map_err(|e| {
            tracing::error!("Server error: {}", e);
            anyhow::anyhow!("Server error: {}", e)
        })?;

    Ok(())
}

/// Resolves on Ctrl-C and cancels in-flight session waits.
async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    token.cancel();
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper_api::auth::credentials::PgCredentialVerifier;
use gatekeeper_api::auth::geo::{DisabledGeoLocator, GeoLocator, HttpGeoLocator};
use gatekeeper_api::auth::jwt::TokenIssuer;
use gatekeeper_api::background;
use gatekeeper_api::config::ServerConfig;
use gatekeeper_api::router::build_app_router;
use gatekeeper_api::settings::SettingsService;
use gatekeeper_api::state::AppState;
use gatekeeper_db::store::PgStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatekeeper_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid configuration");
    tracing::info!(
        host = %config.host,
        port = %config.port,
        trusted_proxies = config.trusted_proxies.len(),
        "Loaded server configuration"
    );

    let issuer = TokenIssuer::new(&config.jwt).expect("Invalid JWT configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = gatekeeper_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    gatekeeper_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    gatekeeper_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let store = Arc::new(PgStore::new(pool.clone()));

    // --- Security settings ---
    let settings = Arc::new(
        SettingsService::load(store.clone(), config.security_defaults.clone())
            .await
            .expect("Failed to load security settings"),
    );

    // --- Geo-lookup ---
    let geo: Arc<dyn GeoLocator> = match &config.geo_lookup_url {
        Some(url) => {
            let locator = HttpGeoLocator::new(
                url.clone(),
                Duration::from_secs(config.geo_lookup_timeout_secs),
            )
            .expect("Failed to build geo-lookup client");
            tracing::info!(url = %url, "Geo-lookup enabled");
            Arc::new(locator)
        }
        None => {
            tracing::info!("Geo-lookup disabled (GEO_LOOKUP_URL not set)");
            Arc::new(DisabledGeoLocator)
        }
    };

    // --- App state ---
    let verifier = Arc::new(PgCredentialVerifier::new(pool));
    let state = AppState::new(store, verifier, geo, config.clone(), settings, issuer);

    // --- Background jobs ---
    let cancel = tokio_util::sync::CancellationToken::new();
    let sweep_handle = tokio::spawn(background::session_sweep::run(
        state.clone(),
        cancel.clone(),
    ));
    let retention_handle = tokio::spawn(background::retention::run(
        state.clone(),
        cancel.clone(),
    ));
    tracing::info!("Background jobs started (session sweep, retention)");

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    // Peer addresses feed `ClientContext` when no proxy header is present.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    let _ = tokio::time::timeout(drain, sweep_handle).await;
    let _ = tokio::time::timeout(drain, retention_handle).await;
    tracing::info!("Background jobs stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

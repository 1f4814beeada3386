use std::sync::Arc;

use gatekeeper_db::store::Store;

use crate::auth::credentials::CredentialVerifier;
use crate::auth::geo::GeoLocator;
use crate::auth::ip_blocker::IpBlocker;
use crate::auth::jwt::TokenIssuer;
use crate::auth::orchestrator::AuthOrchestrator;
use crate::auth::refresh_tokens::RefreshTokenService;
use crate::auth::reuse::ReuseDetector;
use crate::auth::sessions::SessionRegistry;
use crate::auth::token_cache::TokenCache;
use crate::config::ServerConfig;
use crate::settings::SettingsService;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (every service is behind an `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Durable storage for every aggregate.
    pub store: Arc<dyn Store>,
    pub config: Arc<ServerConfig>,
    pub settings: Arc<SettingsService>,
    pub issuer: Arc<TokenIssuer>,
    pub refresh_tokens: Arc<RefreshTokenService>,
    pub reuse: Arc<ReuseDetector>,
    pub ip_blocker: Arc<IpBlocker>,
    pub sessions: Arc<SessionRegistry>,
    pub token_cache: Arc<TokenCache>,
    pub orchestrator: Arc<AuthOrchestrator>,
}

impl AppState {
    /// Wire every auth service over `store`.
    pub fn new<S: Store + 'static>(
        store: Arc<S>,
        verifier: Arc<dyn CredentialVerifier>,
        geo: Arc<dyn GeoLocator>,
        config: ServerConfig,
        settings: Arc<SettingsService>,
        issuer: TokenIssuer,
    ) -> Self {
        let issuer = Arc::new(issuer);
        let refresh_tokens = Arc::new(RefreshTokenService::new(
            store.clone(),
            config.jwt.refresh_token_expiry_days,
        ));
        let ip_blocker = Arc::new(IpBlocker::new(store.clone(), settings.clone()));
        let sessions = Arc::new(SessionRegistry::new(store.clone(), settings.clone(), geo));
        let token_cache = Arc::new(TokenCache::new());
        let reuse = Arc::new(ReuseDetector::new(
            config.reuse_ledger_key.as_bytes(),
            config.reuse_ledger_ttl_hours,
            refresh_tokens.clone(),
            sessions.clone(),
            token_cache.clone(),
        ));
        let orchestrator = Arc::new(AuthOrchestrator::new(
            verifier,
            issuer.clone(),
            refresh_tokens.clone(),
            reuse.clone(),
            ip_blocker.clone(),
            sessions.clone(),
            token_cache.clone(),
        ));

        Self {
            store,
            config: Arc::new(config),
            settings,
            issuer,
            refresh_tokens,
            reuse,
            ip_blocker,
            sessions,
            token_cache,
            orchestrator,
        }
    }
}

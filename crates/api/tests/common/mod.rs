#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use gatekeeper_api::auth::credentials::{
    CredentialFailure, CredentialVerifier, Principal, Verification,
};
use gatekeeper_api::auth::geo::DisabledGeoLocator;
use gatekeeper_api::auth::jwt::{JwtConfig, TokenIssuer};
use gatekeeper_api::config::ServerConfig;
use gatekeeper_api::error::AppResult;
use gatekeeper_api::router::build_app_router;
use gatekeeper_api::settings::SettingsService;
use gatekeeper_api::state::AppState;
use gatekeeper_core::claims::UserIdentity;
use gatekeeper_core::settings::SecuritySettings;
use gatekeeper_core::types::DbId;
use gatekeeper_db::store::MemoryStore;
use http_body_util::BodyExt;
use tower::ServiceExt;

/// Password shared by every test user.
pub const PASSWORD: &str = "correct-horse-battery";

/// `ada` (admin), `bob` (no roles), `carol` (security officer).
pub const ADMIN: &str = "ada";
pub const MEMBER: &str = "bob";
pub const OFFICER: &str = "carol";

/// Socket peer of requests that do not name one.
pub const DEFAULT_PEER: &str = "192.0.2.200";

/// Range the test deployment trusts as reverse proxies.
pub const PROXY_RANGE: &str = "10.0.0.0/8";

/// In-memory user directory.
struct TestDirectory {
    users: HashMap<String, Principal>,
}

impl TestDirectory {
    fn new() -> Self {
        let user = |id: DbId, name: &str, roles: &[&str], permissions: &[&str]| Principal {
            identity: UserIdentity {
                id,
                username: name.to_string(),
                email: format!("{name}@example.com"),
                security_stamp: format!("stamp-{id}"),
            },
            roles: roles.iter().map(|r| r.to_string()).collect(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        };
        let users = [
            user(1, ADMIN, &["admin"], &["security.manage"]),
            user(2, MEMBER, &[], &[]),
            user(3, OFFICER, &["security-officer"], &["security.manage"]),
        ]
        .into_iter()
        .map(|p| (p.identity.username.clone(), p))
        .collect();
        Self { users }
    }
}

#[async_trait]
impl CredentialVerifier for TestDirectory {
    async fn verify(&self, username: &str, password: &str) -> AppResult<Verification> {
        Ok(match self.users.get(username) {
            None => Verification::Rejected(CredentialFailure::UnknownUser),
            Some(_) if password != PASSWORD => {
                Verification::Rejected(CredentialFailure::BadPassword)
            }
            Some(principal) => Verification::Verified(principal.clone()),
        })
    }

    async fn load_principal(&self, user_id: DbId) -> AppResult<Option<Principal>> {
        Ok(self
            .users
            .values()
            .find(|p| p.identity.id == user_id)
            .cloned())
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(security_defaults: SecuritySettings) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        trusted_proxies: vec![PROXY_RANGE.parse().unwrap()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        jwt: JwtConfig {
            secret: "integration-test-secret-of-at-least-32-bytes".to_string(),
            issuer: "gatekeeper".to_string(),
            audience: "gatekeeper-console".to_string(),
            access_token_expiry_mins: 15,
            refresh_token_expiry_days: 7,
        },
        reuse_ledger_key: "integration-test-ledger-key".to_string(),
        reuse_ledger_ttl_hours: 24,
        geo_lookup_url: None,
        geo_lookup_timeout_secs: 1,
        session_sweep_interval_secs: 300,
        retention_sweep_interval_secs: 3600,
        refresh_token_retention_days: 30,
        security_defaults,
    }
}

/// The application router plus handles for inspecting its state.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(SecuritySettings::default())
}

/// Build the full application router with all middleware layers over an
/// in-memory store.
pub fn build_test_app_with(settings: SecuritySettings) -> TestApp {
    let config = test_config(settings.clone());
    let store = Arc::new(MemoryStore::new());
    let settings = Arc::new(SettingsService::with_settings(store.clone(), settings));
    let issuer = TokenIssuer::new(&config.jwt).unwrap();

    let state = AppState::new(
        store.clone(),
        Arc::new(TestDirectory::new()),
        Arc::new(DisabledGeoLocator),
        config.clone(),
        settings,
        issuer,
    );
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        store,
        state,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Where a test request comes from.
#[derive(Clone, Copy)]
struct Origin<'a> {
    peer: &'a str,
    forwarded_for: Option<&'a str>,
}

const DIRECT: Origin<'static> = Origin {
    peer: DEFAULT_PEER,
    forwarded_for: None,
};

async fn send_from(
    app: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    origin: Origin<'_>,
    body: Option<serde_json::Value>,
) -> Response {
    let peer: SocketAddr = format!("{}:40000", origin.peer).parse().unwrap();
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(peer));
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    if let Some(chain) = origin.forwarded_for {
        builder = builder.header("x-forwarded-for", chain);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.oneshot(builder.body(body).unwrap()).await.unwrap()
}

async fn send(
    app: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Response {
    send_from(app, method, uri, token, DIRECT, body).await
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri, None, None).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response {
    send(app, Method::GET, uri, Some(token), None).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    send(app, Method::POST, uri, None, Some(body)).await
}

/// POST from socket peer `ip`, with no forwarding headers.
pub async fn post_json_from(app: Router, uri: &str, body: serde_json::Value, ip: &str) -> Response {
    let origin = Origin {
        peer: ip,
        forwarded_for: None,
    };
    send_from(app, Method::POST, uri, None, origin, Some(body)).await
}

/// POST from socket peer `peer` carrying `X-Forwarded-For: forwarded_for`.
pub async fn post_json_forwarded(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    peer: &str,
    forwarded_for: &str,
) -> Response {
    let origin = Origin {
        peer,
        forwarded_for: Some(forwarded_for),
    };
    send_from(app, Method::POST, uri, None, origin, Some(body)).await
}

pub async fn post_json_auth(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Response {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}

pub async fn post_auth(app: Router, uri: &str, token: &str) -> Response {
    send(app, Method::POST, uri, Some(token), None).await
}

pub async fn put_json_auth(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Response {
    send(app, Method::PUT, uri, Some(token), Some(body)).await
}

pub async fn delete_auth(app: Router, uri: &str, token: &str) -> Response {
    send(app, Method::DELETE, uri, Some(token), None).await
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Log `username` in and return the response body.
pub async fn login(app: &Router, username: &str) -> serde_json::Value {
    let body = serde_json::json!({ "username": username, "password": PASSWORD });
    let response = post_json(app.clone(), "/api/v1/auth/login", body).await;
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    body_json(response).await
}

/// Log `username` in and return just the access token.
pub async fn access_token(app: &Router, username: &str) -> String {
    login(app, username).await["token"]
        .as_str()
        .unwrap()
        .to_string()
}

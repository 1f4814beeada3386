//! Handlers for the `/auth` resource (login, refresh, logout).

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use gatekeeper_core::error::CoreError;
use gatekeeper_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::orchestrator::{AuthOutcome, LoginAttempt};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthToken;
use crate::middleware::client::ClientContext;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /auth/login`.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 256))]
    pub username: String,
    #[validate(length(min = 1, max = 1024))]
    pub password: String,
    /// Optional client-chosen id for sharing this session's tokens.
    #[validate(length(min = 1, max = 128))]
    pub device_id: Option<String>,
}

/// Request body for `POST /auth/refresh`.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Successful authentication response returned by login and refresh.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub refresh_token: String,
    /// Access token expiry (UTC).
    pub expiration: Timestamp,
    pub user_id: DbId,
    pub roles: Vec<String>,
    pub session_id: DbId,
}

impl From<AuthOutcome> for AuthResponse {
    fn from(outcome: AuthOutcome) -> Self {
        Self {
            token: outcome.access_token,
            refresh_token: outcome.refresh_token,
            expiration: outcome.access_expires_at,
            user_id: outcome.user_id,
            roles: outcome.roles,
            session_id: outcome.session_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/auth/login
///
/// Authenticate with username + password. Returns an access/refresh pair.
pub async fn login(
    State(state): State<AppState>,
    client: ClientContext,
    Json(input): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    input
        .validate()
        .map_err(|e| AppError::Core(CoreError::Validation(e.to_string())))?;

    let outcome = state
        .orchestrator
        .login(&LoginAttempt {
            username: input.username.trim(),
            password: &input.password,
            device_id: input.device_id.as_deref(),
            ip: &client.ip,
            user_agent: client.user_agent.as_deref(),
        })
        .await?;

    Ok(Json(outcome.into()))
}

/// POST /api/v1/auth/refresh
///
/// Exchange a refresh token for a new pair. The presented token is consumed.
pub async fn refresh(
    State(state): State<AppState>,
    client: ClientContext,
    Json(input): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    if input.refresh_token.trim().is_empty() {
        return Err(AppError::BadRequest("refresh_token is required".into()));
    }

    let outcome = state
        .orchestrator
        .refresh(
            input.refresh_token.trim(),
            Some(&client.ip),
            client.user_agent.as_deref(),
        )
        .await?;

    Ok(Json(outcome.into()))
}

/// POST /api/v1/auth/logout
///
/// Revoke the caller's refresh tokens and end the current session.
/// Repeating the call with the same token is a no-op.
pub async fn logout(
    State(state): State<AppState>,
    AuthToken(claims): AuthToken,
) -> AppResult<StatusCode> {
    state.orchestrator.logout(claims.sub, &claims.jti).await?;
    Ok(StatusCode::NO_CONTENT)
}

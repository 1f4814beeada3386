//! JWT-based authentication extractors for Axum handlers.
//!
//! [`AuthToken`] checks the token alone. [`AuthUser`] additionally requires
//! the session the token was issued for to still be live, so logout, session
//! termination and reuse revocation cut off access tokens immediately.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use gatekeeper_core::error::CoreError;
use gatekeeper_core::types::DbId;

use crate::auth::jwt::Claims;
use crate::error::AppError;
use crate::state::AppState;

fn unauthorized(message: &str) -> AppError {
    AppError::Core(CoreError::Unauthorized(message.into()))
}

/// Validated claims of the bearer token, without a session lookup.
///
/// Signature, expiry, issuer and audience are all checked.
#[derive(Debug, Clone)]
pub struct AuthToken(pub Claims);

impl FromRequestParts<AppState> for AuthToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| unauthorized("Invalid Authorization format. Expected: Bearer <token>"))?;

        let claims = state
            .issuer
            .validate(token)
            .map_err(|_| unauthorized("Invalid or expired token"))?;

        Ok(AuthToken(claims))
    }
}

/// Authenticated user extracted from a JWT Bearer token in the `Authorization` header.
///
/// The token must be valid and its `jti` must back an active, unexpired
/// session of the same user.
///
/// ```ignore
/// async fn my_handler(user: AuthUser) -> AppResult<Json<()>> {
///     tracing::info!(user_id = user.user_id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user's internal database id (from `claims.sub`).
    pub user_id: DbId,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    /// The token's `jti`.
    pub jwt_id: String,
    /// The session the token is bound to.
    pub session_id: DbId,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthToken(claims) = AuthToken::from_request_parts(parts, state).await?;

        let session = state
            .sessions
            .find_for_token(claims.sub, &claims.jti)
            .await?
            .ok_or_else(|| unauthorized("Session is no longer active"))?;

        Ok(AuthUser {
            user_id: claims.sub,
            username: claims.name,
            roles: claims.roles,
            permissions: claims.permissions,
            jwt_id: claims.jti,
            session_id: session.id,
        })
    }
}

//! Role-based access control (RBAC) extractor.
//!
//! The extractor wraps [`AuthUser`] and rejects requests that lack the
//! required role or permission.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use gatekeeper_core::error::CoreError;
use gatekeeper_core::roles::{PERMISSION_SECURITY_MANAGE, ROLE_ADMIN};

use super::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

/// Requires the `admin` role or the `security.manage` permission. Rejects
/// with 403 Forbidden otherwise.
///
/// ```ignore
/// async fn block(RequireSecurityAdmin(user): RequireSecurityAdmin) -> AppResult<StatusCode> {
///     Ok(StatusCode::NO_CONTENT)
/// }
/// ```
pub struct RequireSecurityAdmin(pub AuthUser);

impl FromRequestParts<AppState> for RequireSecurityAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.has_role(ROLE_ADMIN) && !user.has_permission(PERMISSION_SECURITY_MANAGE) {
            return Err(AppError::Core(CoreError::Forbidden(
                "Security management permission required".into(),
            )));
        }
        Ok(RequireSecurityAdmin(user))
    }
}

//! Handlers for the `/session` resource: the caller's own sessions and the
//! security configuration.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use gatekeeper_core::error::CoreError;
use gatekeeper_core::settings::{SecuritySettings, SecuritySettingsUpdate};
use gatekeeper_core::types::DbId;
use gatekeeper_db::models::session::UserSession;
use serde::{Deserialize, Serialize};

use crate::auth::sessions::SessionStatistics;
use crate::auth::token_cache::SlotKey;
use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::middleware::rbac::RequireSecurityAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// A session as shown to its owner.
#[derive(Debug, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: UserSession,
    /// Whether this session backs the token making the request.
    pub is_current: bool,
}

#[derive(Debug, Deserialize)]
pub struct TerminateAllParams {
    /// Identifies the caller's session when it predates `jwt_id` tracking.
    pub current_session_id: Option<DbId>,
}

#[derive(Debug, Serialize)]
pub struct TerminateAllResponse {
    pub terminated: bool,
}

/// GET /api/v1/session/my-sessions
pub async fn my_sessions(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<Vec<SessionView>>>> {
    let sessions = state.sessions.list_active(user.user_id).await?;
    let data = sessions
        .into_iter()
        .map(|session| SessionView {
            is_current: session.id == user.session_id,
            session,
        })
        .collect();
    Ok(Json(DataResponse { data }))
}

/// DELETE /api/v1/session/{id}
///
/// Ends one of the caller's sessions. Sessions of other users are reported
/// as not found.
pub async fn terminate_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<StatusCode> {
    if !state.sessions.terminate(id, user.user_id).await? {
        return Err(CoreError::NotFound {
            entity: "Session",
            id: id.to_string(),
        }
        .into());
    }
    state
        .token_cache
        .remove_slot(&SlotKey::new(user.user_id, id.to_string()))
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/session/my-sessions/terminate-all
///
/// Ends every session of the caller except the current one.
pub async fn terminate_all(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<TerminateAllParams>,
) -> AppResult<Json<TerminateAllResponse>> {
    let terminated = state
        .sessions
        .terminate_all(
            user.user_id,
            Some(user.jwt_id.as_str()),
            params.current_session_id,
        )
        .await?;
    Ok(Json(TerminateAllResponse { terminated }))
}

/// GET /api/v1/session/statistics
pub async fn statistics(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<SessionStatistics>> {
    Ok(Json(state.sessions.statistics(user.user_id).await?))
}

/// GET /api/v1/session/configuration
pub async fn get_configuration(
    State(state): State<AppState>,
    _user: AuthUser,
) -> AppResult<Json<SecuritySettings>> {
    Ok(Json(state.settings.current().await))
}

/// PUT /api/v1/session/configuration
///
/// Partial update; omitted fields keep their value.
pub async fn update_configuration(
    State(state): State<AppState>,
    RequireSecurityAdmin(admin): RequireSecurityAdmin,
    Json(input): Json<SecuritySettingsUpdate>,
) -> AppResult<Json<SecuritySettings>> {
    let updated = state.settings.update(&input).await?;
    tracing::info!(user_id = admin.user_id, "Security configuration changed");
    Ok(Json(updated))
}

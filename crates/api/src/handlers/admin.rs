//! Handlers for the `/admin` security surface (IP blocks, failed logins).
//!
//! Every handler requires the `admin` role or the `security.manage`
//! permission.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use gatekeeper_core::error::CoreError;
use gatekeeper_db::models::blocked_ip::BlockedIp;
use gatekeeper_db::models::failed_login_attempt::FailedLoginAttempt;
use serde::Deserialize;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::rbac::RequireSecurityAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /admin/blocked-ips`.
#[derive(Debug, Deserialize, Validate)]
pub struct BlockIpRequest {
    pub ip_address: String,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    /// Omit for a permanent block.
    #[validate(range(min = 1))]
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FailedLoginParams {
    pub limit: Option<i64>,
}

/// GET /api/v1/admin/blocked-ips
pub async fn list_blocked_ips(
    State(state): State<AppState>,
    _admin: RequireSecurityAdmin,
) -> AppResult<Json<DataResponse<Vec<BlockedIp>>>> {
    let data = state.ip_blocker.list_active_blocks().await?;
    Ok(Json(DataResponse { data }))
}

/// POST /api/v1/admin/blocked-ips
pub async fn block_ip(
    State(state): State<AppState>,
    RequireSecurityAdmin(admin): RequireSecurityAdmin,
    Json(input): Json<BlockIpRequest>,
) -> AppResult<(StatusCode, Json<BlockedIp>)> {
    input
        .validate()
        .map_err(|e| AppError::Core(CoreError::Validation(e.to_string())))?;

    let block = state
        .ip_blocker
        .block_manually(&input.ip_address, &input.reason, input.duration_minutes)
        .await?;
    tracing::info!(user_id = admin.user_id, ip = %block.ip_address, "Admin blocked IP");
    Ok((StatusCode::CREATED, Json(block)))
}

/// DELETE /api/v1/admin/blocked-ips/{ip}
pub async fn unblock_ip(
    State(state): State<AppState>,
    RequireSecurityAdmin(admin): RequireSecurityAdmin,
    Path(ip): Path<String>,
) -> AppResult<StatusCode> {
    state.ip_blocker.unblock(&ip).await?;
    tracing::info!(user_id = admin.user_id, ip = %ip, "Admin unblocked IP");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/admin/failed-logins?limit=
pub async fn failed_logins(
    State(state): State<AppState>,
    _admin: RequireSecurityAdmin,
    Query(params): Query<FailedLoginParams>,
) -> AppResult<Json<DataResponse<Vec<FailedLoginAttempt>>>> {
    let data = state.ip_blocker.recent_failures(params.limit).await?;
    Ok(Json(DataResponse { data }))
}

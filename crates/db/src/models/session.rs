//! User session model and DTOs.

use gatekeeper_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `user_sessions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserSession {
    pub id: DbId,
    pub user_id: DbId,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_type: String,
    pub browser: String,
    pub os: String,
    pub location: String,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
    pub expires_at: Timestamp,
    pub is_active: bool,
    /// Opaque identifier; never returned to other users.
    #[serde(skip_serializing)]
    pub session_token: String,
    /// `jti` of the access token currently backing this session. `None` for
    /// rows created before sessions were correlated with tokens.
    #[serde(skip_serializing)]
    pub jwt_id: Option<String>,
}

/// DTO for inserting a user session.
#[derive(Debug, Clone)]
pub struct CreateUserSession {
    pub user_id: DbId,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_type: String,
    pub browser: String,
    pub os: String,
    pub location: String,
    pub expires_at: Timestamp,
    pub session_token: String,
    pub jwt_id: Option<String>,
}

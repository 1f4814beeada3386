//! Failed login attempt model and DTOs.

use gatekeeper_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `failed_login_attempts` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FailedLoginAttempt {
    pub id: DbId,
    pub username: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub reason: String,
    pub attempt_time: Timestamp,
}

/// DTO for recording a failed login attempt.
#[derive(Debug, Clone)]
pub struct CreateFailedLoginAttempt {
    pub username: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub reason: String,
}

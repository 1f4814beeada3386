//! Blocked IP model and DTOs.

use gatekeeper_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `blocked_ips` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BlockedIp {
    pub id: DbId,
    pub ip_address: String,
    pub blocked_at: Timestamp,
    /// `None` only for permanent blocks.
    pub expires_at: Option<Timestamp>,
    pub reason: String,
    pub failed_attempts: i32,
    pub is_permanent: bool,
    pub is_active: bool,
}

/// DTO for creating a block.
#[derive(Debug, Clone)]
pub struct CreateBlockedIp {
    pub ip_address: String,
    pub expires_at: Option<Timestamp>,
    pub reason: String,
    pub failed_attempts: i32,
    pub is_permanent: bool,
}

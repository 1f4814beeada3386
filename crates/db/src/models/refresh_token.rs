//! Refresh token model and DTOs.

use gatekeeper_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `refresh_tokens` table.
///
/// Holds the digest of the token, never the token itself.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: DbId,
    pub user_id: DbId,
    pub token_hash: String,
    /// `jti` of the access token issued alongside this refresh token.
    pub jwt_id: String,
    pub expires_at: Timestamp,
    pub is_revoked: bool,
    pub revoked_at: Option<Timestamp>,
    pub revocation_reason: Option<String>,
    pub created_by_ip: Option<String>,
    pub last_used_by_ip: Option<String>,
    pub last_used_at: Option<Timestamp>,
    pub use_count: i32,
    pub created_at: Timestamp,
}

impl RefreshToken {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at < now
    }
}

/// DTO for inserting a refresh token.
#[derive(Debug, Clone)]
pub struct CreateRefreshToken {
    pub user_id: DbId,
    pub token_hash: String,
    pub jwt_id: String,
    pub expires_at: Timestamp,
    pub created_by_ip: Option<String>,
}

/// Outcome of a committed rotation: the consumed row and its successor.
#[derive(Debug, Clone)]
pub struct RotatedPair {
    pub previous: RefreshToken,
    pub current: RefreshToken,
}

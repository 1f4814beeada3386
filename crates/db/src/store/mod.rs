//! Storage seams consumed by the API services.
//!
//! Each trait covers one aggregate. [`PgStore`] implements them over the
//! repositories; [`MemoryStore`] implements them in-process for tests and
//! single-instance development. Every method is atomic with respect to the
//! others on the same store.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use gatekeeper_core::types::{DbId, Timestamp};

use crate::models::blocked_ip::{BlockedIp, CreateBlockedIp};
use crate::models::failed_login_attempt::{CreateFailedLoginAttempt, FailedLoginAttempt};
use crate::models::refresh_token::{CreateRefreshToken, RefreshToken, RotatedPair};
use crate::models::security_setting::SecuritySettingRow;
use crate::models::session::{CreateUserSession, UserSession};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors raised by a store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness rule rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(&self, input: &CreateRefreshToken) -> StoreResult<RefreshToken>;

    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>>;

    /// Revoke `previous_id` as rotated and insert `successor`, atomically.
    ///
    /// Returns `None`, writing nothing, if `previous_id` was already revoked.
    async fn rotate_refresh_token(
        &self,
        previous_id: DbId,
        used_by_ip: Option<&str>,
        successor: &CreateRefreshToken,
    ) -> StoreResult<Option<RotatedPair>>;

    async fn revoke_user_refresh_tokens(&self, user_id: DbId, reason: &str) -> StoreResult<u64>;

    async fn purge_refresh_tokens(&self, expired_before: Timestamp) -> StoreResult<u64>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session, first deactivating least-recently-active sessions
    /// until fewer than `max_active` remain. Returns the evicted rows too.
    async fn insert_session_capped(
        &self,
        input: &CreateUserSession,
        max_active: i64,
    ) -> StoreResult<(UserSession, Vec<UserSession>)>;

    async fn find_session(&self, id: DbId) -> StoreResult<Option<UserSession>>;

    async fn find_session_by_jwt_id(
        &self,
        user_id: DbId,
        jwt_id: &str,
    ) -> StoreResult<Option<UserSession>>;

    /// Active sessions, most recently active first.
    async fn list_active_sessions(&self, user_id: DbId) -> StoreResult<Vec<UserSession>>;

    async fn deactivate_owned_session(&self, id: DbId, user_id: DbId) -> StoreResult<bool>;

    async fn deactivate_sessions_except(
        &self,
        user_id: DbId,
        except_jwt_id: Option<&str>,
        except_session_id: Option<DbId>,
    ) -> StoreResult<u64>;

    async fn deactivate_session_by_jwt_id(&self, user_id: DbId, jwt_id: &str)
        -> StoreResult<bool>;

    async fn touch_session(
        &self,
        id: DbId,
        now: Timestamp,
        expires_at: Timestamp,
    ) -> StoreResult<bool>;

    async fn set_session_jwt_id(&self, id: DbId, jwt_id: &str) -> StoreResult<bool>;

    async fn deactivate_expired_sessions(&self, now: Timestamp) -> StoreResult<u64>;
}

#[async_trait]
pub trait LoginAttemptStore: Send + Sync {
    async fn insert_failed_attempt(
        &self,
        input: &CreateFailedLoginAttempt,
    ) -> StoreResult<FailedLoginAttempt>;

    async fn count_failed_attempts_since(
        &self,
        ip_address: &str,
        since: Timestamp,
    ) -> StoreResult<i64>;

    async fn recent_failed_attempts(&self, limit: i64) -> StoreResult<Vec<FailedLoginAttempt>>;

    async fn purge_failed_attempts(&self, before: Timestamp) -> StoreResult<u64>;

    async fn find_active_block(&self, ip_address: &str) -> StoreResult<Option<BlockedIp>>;

    /// Fails with [`StoreError::Conflict`] if the address is already blocked.
    async fn insert_block(&self, input: &CreateBlockedIp) -> StoreResult<BlockedIp>;

    async fn deactivate_block(&self, id: DbId) -> StoreResult<bool>;

    async fn deactivate_block_for_ip(&self, ip_address: &str) -> StoreResult<bool>;

    async fn list_active_blocks(&self) -> StoreResult<Vec<BlockedIp>>;

    async fn deactivate_expired_blocks(&self, now: Timestamp) -> StoreResult<u64>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_settings(&self) -> StoreResult<Vec<SecuritySettingRow>>;

    async fn save_settings(&self, entries: &[(&str, String)]) -> StoreResult<()>;
}

/// Every aggregate plus a liveness probe.
#[async_trait]
pub trait Store: RefreshTokenStore + SessionStore + LoginAttemptStore + SettingsStore {
    async fn ping(&self) -> StoreResult<()>;
}

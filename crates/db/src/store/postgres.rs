//! PostgreSQL-backed store.

use async_trait::async_trait;
use gatekeeper_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use super::{
    LoginAttemptStore, RefreshTokenStore, SessionStore, SettingsStore, Store, StoreError,
    StoreResult,
};
use crate::models::blocked_ip::{BlockedIp, CreateBlockedIp};
use crate::models::failed_login_attempt::{CreateFailedLoginAttempt, FailedLoginAttempt};
use crate::models::refresh_token::{CreateRefreshToken, RefreshToken, RotatedPair};
use crate::models::security_setting::SecuritySettingRow;
use crate::models::session::{CreateUserSession, UserSession};
use crate::repositories::{
    BlockedIpRepo, FailedLoginAttemptRepo, RefreshTokenRepo, SecuritySettingRepo, SessionRepo,
};

/// Store implementation delegating to the repositories.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map PostgreSQL unique violations (23505) onto [`StoreError::Conflict`].
fn conflict_on_unique(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            return StoreError::Conflict(constraint);
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn insert_refresh_token(&self, input: &CreateRefreshToken) -> StoreResult<RefreshToken> {
        RefreshTokenRepo::create(&self.pool, input)
            .await
            .map_err(conflict_on_unique)
    }

    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        Ok(RefreshTokenRepo::find_by_hash(&self.pool, token_hash).await?)
    }

    async fn rotate_refresh_token(
        &self,
        previous_id: DbId,
        used_by_ip: Option<&str>,
        successor: &CreateRefreshToken,
    ) -> StoreResult<Option<RotatedPair>> {
        RefreshTokenRepo::rotate(&self.pool, previous_id, used_by_ip, successor)
            .await
            .map_err(conflict_on_unique)
    }

    async fn revoke_user_refresh_tokens(&self, user_id: DbId, reason: &str) -> StoreResult<u64> {
        Ok(RefreshTokenRepo::revoke_all_for_user(&self.pool, user_id, reason).await?)
    }

    async fn purge_refresh_tokens(&self, expired_before: Timestamp) -> StoreResult<u64> {
        Ok(RefreshTokenRepo::delete_expired_before(&self.pool, expired_before).await?)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session_capped(
        &self,
        input: &CreateUserSession,
        max_active: i64,
    ) -> StoreResult<(UserSession, Vec<UserSession>)> {
        SessionRepo::create_capped(&self.pool, input, max_active)
            .await
            .map_err(conflict_on_unique)
    }

    async fn find_session(&self, id: DbId) -> StoreResult<Option<UserSession>> {
        Ok(SessionRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_session_by_jwt_id(
        &self,
        user_id: DbId,
        jwt_id: &str,
    ) -> StoreResult<Option<UserSession>> {
        Ok(SessionRepo::find_active_by_jwt_id(&self.pool, user_id, jwt_id).await?)
    }

    async fn list_active_sessions(&self, user_id: DbId) -> StoreResult<Vec<UserSession>> {
        Ok(SessionRepo::list_active_for_user(&self.pool, user_id).await?)
    }

    async fn deactivate_owned_session(&self, id: DbId, user_id: DbId) -> StoreResult<bool> {
        Ok(SessionRepo::deactivate_owned(&self.pool, id, user_id).await?)
    }

    async fn deactivate_sessions_except(
        &self,
        user_id: DbId,
        except_jwt_id: Option<&str>,
        except_session_id: Option<DbId>,
    ) -> StoreResult<u64> {
        Ok(
            SessionRepo::deactivate_all_except(&self.pool, user_id, except_jwt_id, except_session_id)
                .await?,
        )
    }

    async fn deactivate_session_by_jwt_id(
        &self,
        user_id: DbId,
        jwt_id: &str,
    ) -> StoreResult<bool> {
        Ok(SessionRepo::deactivate_by_jwt_id(&self.pool, user_id, jwt_id).await?)
    }

    async fn touch_session(
        &self,
        id: DbId,
        now: Timestamp,
        expires_at: Timestamp,
    ) -> StoreResult<bool> {
        Ok(SessionRepo::touch(&self.pool, id, now, expires_at).await?)
    }

    async fn set_session_jwt_id(&self, id: DbId, jwt_id: &str) -> StoreResult<bool> {
        Ok(SessionRepo::set_jwt_id(&self.pool, id, jwt_id).await?)
    }

    async fn deactivate_expired_sessions(&self, now: Timestamp) -> StoreResult<u64> {
        Ok(SessionRepo::deactivate_expired(&self.pool, now).await?)
    }
}

#[async_trait]
impl LoginAttemptStore for PgStore {
    async fn insert_failed_attempt(
        &self,
        input: &CreateFailedLoginAttempt,
    ) -> StoreResult<FailedLoginAttempt> {
        Ok(FailedLoginAttemptRepo::create(&self.pool, input).await?)
    }

    async fn count_failed_attempts_since(
        &self,
        ip_address: &str,
        since: Timestamp,
    ) -> StoreResult<i64> {
        Ok(FailedLoginAttemptRepo::count_since(&self.pool, ip_address, since).await?)
    }

    async fn recent_failed_attempts(&self, limit: i64) -> StoreResult<Vec<FailedLoginAttempt>> {
        Ok(FailedLoginAttemptRepo::list_recent(&self.pool, limit).await?)
    }

    async fn purge_failed_attempts(&self, before: Timestamp) -> StoreResult<u64> {
        Ok(FailedLoginAttemptRepo::delete_before(&self.pool, before).await?)
    }

    async fn find_active_block(&self, ip_address: &str) -> StoreResult<Option<BlockedIp>> {
        Ok(BlockedIpRepo::find_active(&self.pool, ip_address).await?)
    }

    async fn insert_block(&self, input: &CreateBlockedIp) -> StoreResult<BlockedIp> {
        BlockedIpRepo::create(&self.pool, input)
            .await
            .map_err(conflict_on_unique)
    }

    async fn deactivate_block(&self, id: DbId) -> StoreResult<bool> {
        Ok(BlockedIpRepo::deactivate(&self.pool, id).await?)
    }

    async fn deactivate_block_for_ip(&self, ip_address: &str) -> StoreResult<bool> {
        Ok(BlockedIpRepo::deactivate_for_ip(&self.pool, ip_address).await?)
    }

    async fn list_active_blocks(&self) -> StoreResult<Vec<BlockedIp>> {
        Ok(BlockedIpRepo::list_active(&self.pool).await?)
    }

    async fn deactivate_expired_blocks(&self, now: Timestamp) -> StoreResult<u64> {
        Ok(BlockedIpRepo::deactivate_expired(&self.pool, now).await?)
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn load_settings(&self) -> StoreResult<Vec<SecuritySettingRow>> {
        Ok(SecuritySettingRepo::list(&self.pool).await?)
    }

    async fn save_settings(&self, entries: &[(&str, String)]) -> StoreResult<()> {
        Ok(SecuritySettingRepo::upsert_many(&self.pool, entries).await?)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(crate::health_check(&self.pool).await?)
    }
}

//! Refresh-token lifecycle: creation, single-use rotation, revocation.
//!
//! Token values are 512-bit random strings handed to the client once; the
//! store only ever sees their SHA-256 digest. Rotation is linearized by the
//! store's conditional revoke, so concurrent rotations of one value produce
//! exactly one successor.

use std::sync::Arc;

use chrono::{Duration, Utc};
use gatekeeper_core::error::CoreError;
use gatekeeper_core::tokens::{generate_refresh_token, hash_refresh_token};
use gatekeeper_core::types::DbId;
use gatekeeper_db::models::refresh_token::{CreateRefreshToken, RefreshToken};
use gatekeeper_db::store::{RefreshTokenStore, StoreError};

use crate::error::{AppError, AppResult};

/// Why a refresh token could not be rotated.
#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("refresh token not found")]
    NotFound,

    #[error("refresh token expired")]
    Expired,

    #[error("refresh token revoked ({reason})")]
    Revoked { user_id: DbId, reason: String },

    /// Lost the race: another rotation revoked the token first.
    #[error("refresh token already rotated")]
    AlreadyRotated { user_id: DbId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RotationError> for AppError {
    fn from(err: RotationError) -> Self {
        let message = match err {
            RotationError::NotFound => "Invalid refresh token",
            RotationError::Expired => "Refresh token has expired",
            RotationError::Revoked { .. } => "Refresh token has been revoked",
            RotationError::AlreadyRotated { .. } => "Refresh token has already been used",
            RotationError::Store(e) => return AppError::Store(e),
        };
        AppError::Core(CoreError::Unauthorized(message.to_string()))
    }
}

/// A committed rotation.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub previous: RefreshToken,
    pub current: RefreshToken,
    /// Plaintext of `current`, for the client.
    pub plaintext: String,
}

pub struct RefreshTokenService {
    store: Arc<dyn RefreshTokenStore>,
    expiry: Duration,
}

impl RefreshTokenService {
    pub fn new(store: Arc<dyn RefreshTokenStore>, expiry_days: i64) -> Self {
        Self {
            store,
            expiry: Duration::days(expiry_days),
        }
    }

    /// Mint and persist a token for `user_id`, bound to access token `jwt_id`.
    ///
    /// Returns the stored row and the plaintext value.
    pub async fn create(
        &self,
        user_id: DbId,
        jwt_id: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> AppResult<(RefreshToken, String)> {
        let generated = generate_refresh_token();
        let input = self.new_row(user_id, jwt_id, generated.hash, ip);
        let row = self.store.insert_refresh_token(&input).await?;
        tracing::debug!(user_id, token_id = row.id, user_agent, "Refresh token created");
        Ok((row, generated.plaintext))
    }

    /// Look a token up and check it is usable, without consuming it.
    pub async fn inspect(&self, value: &str) -> Result<RefreshToken, RotationError> {
        let row = self
            .store
            .find_refresh_token(&hash_refresh_token(value))
            .await?
            .ok_or(RotationError::NotFound)?;

        if row.is_expired_at(Utc::now()) {
            return Err(RotationError::Expired);
        }
        if row.is_revoked {
            return Err(RotationError::Revoked {
                user_id: row.user_id,
                reason: row.revocation_reason.clone().unwrap_or_default(),
            });
        }
        Ok(row)
    }

    /// Consume `row` and issue its successor bound to `jwt_id`.
    ///
    /// `row` should come from [`inspect`](Self::inspect); the store re-checks
    /// revocation atomically, so a stale row fails with `AlreadyRotated`.
    pub async fn rotate_from(
        &self,
        row: &RefreshToken,
        jwt_id: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<Rotation, RotationError> {
        let generated = generate_refresh_token();
        let successor = self.new_row(row.user_id, jwt_id, generated.hash, ip);

        let pair = self
            .store
            .rotate_refresh_token(row.id, ip, &successor)
            .await?
            .ok_or(RotationError::AlreadyRotated {
                user_id: row.user_id,
            })?;

        tracing::debug!(
            user_id = row.user_id,
            previous_id = pair.previous.id,
            current_id = pair.current.id,
            user_agent,
            "Refresh token rotated",
        );
        Ok(Rotation {
            previous: pair.previous,
            current: pair.current,
            plaintext: generated.plaintext,
        })
    }

    /// [`inspect`](Self::inspect) then [`rotate_from`](Self::rotate_from).
    pub async fn rotate(
        &self,
        value: &str,
        jwt_id: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<Rotation, RotationError> {
        let row = self.inspect(value).await?;
        self.rotate_from(&row, jwt_id, ip, user_agent).await
    }

    /// Owner of a token value, whatever its state.
    pub async fn find_owner(&self, value: &str) -> AppResult<Option<DbId>> {
        let row = self
            .store
            .find_refresh_token(&hash_refresh_token(value))
            .await?;
        Ok(row.map(|r| r.user_id))
    }

    /// Revoke every live token of `user_id`. Returns the number revoked.
    pub async fn revoke_all(&self, user_id: DbId, reason: &str) -> AppResult<u64> {
        let revoked = self.store.revoke_user_refresh_tokens(user_id, reason).await?;
        if revoked > 0 {
            tracing::info!(user_id, revoked, reason, "Refresh tokens revoked");
        }
        Ok(revoked)
    }

    /// Delete tokens that expired more than `retention` ago.
    pub async fn purge_expired(&self, retention: Duration) -> AppResult<u64> {
        Ok(self
            .store
            .purge_refresh_tokens(Utc::now() - retention)
            .await?)
    }

    fn new_row(
        &self,
        user_id: DbId,
        jwt_id: &str,
        token_hash: String,
        ip: Option<&str>,
    ) -> CreateRefreshToken {
        CreateRefreshToken {
            user_id,
            token_hash,
            jwt_id: jwt_id.to_string(),
            expires_at: Utc::now() + self.expiry,
            created_by_ip: ip.map(str::to_string),
        }
    }
}

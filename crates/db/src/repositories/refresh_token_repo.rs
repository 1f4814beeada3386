//! Repository for the `refresh_tokens` table.

use gatekeeper_core::tokens::revocation;
use gatekeeper_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::refresh_token::{CreateRefreshToken, RefreshToken, RotatedPair};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, user_id, token_hash, jwt_id, expires_at, is_revoked, revoked_at, \
                       revocation_reason, created_by_ip, last_used_by_ip, last_used_at, \
                       use_count, created_at";

/// Provides data access for refresh tokens.
pub struct RefreshTokenRepo;

impl RefreshTokenRepo {
    /// Insert a new refresh token, returning the created row.
    pub async fn create(
        pool: &PgPool,
        input: &CreateRefreshToken,
    ) -> Result<RefreshToken, sqlx::Error> {
        let query = format!(
            "INSERT INTO refresh_tokens (user_id, token_hash, jwt_id, expires_at, created_by_ip)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RefreshToken>(&query)
            .bind(input.user_id)
            .bind(&input.token_hash)
            .bind(&input.jwt_id)
            .bind(input.expires_at)
            .bind(&input.created_by_ip)
            .fetch_one(pool)
            .await
    }

    /// Find a token by the digest of its value, whatever its state.
    pub async fn find_by_hash(
        pool: &PgPool,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM refresh_tokens WHERE token_hash = $1");
        sqlx::query_as::<_, RefreshToken>(&query)
            .bind(token_hash)
            .fetch_optional(pool)
            .await
    }

    /// Consume `previous_id` and insert its successor in one transaction.
    ///
    /// The predecessor is only revoked if it is still live; when another
    /// rotation got there first nothing is written and `None` is returned.
    pub async fn rotate(
        pool: &PgPool,
        previous_id: DbId,
        used_by_ip: Option<&str>,
        successor: &CreateRefreshToken,
    ) -> Result<Option<RotatedPair>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let revoke = format!(
            "UPDATE refresh_tokens SET
                is_revoked = true,
                revoked_at = NOW(),
                revocation_reason = $2,
                last_used_by_ip = $3,
                last_used_at = NOW(),
                use_count = use_count + 1
             WHERE id = $1 AND is_revoked = false
             RETURNING {COLUMNS}"
        );
        let previous = sqlx::query_as::<_, RefreshToken>(&revoke)
            .bind(previous_id)
            .bind(revocation::ROTATED)
            .bind(used_by_ip)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(previous) = previous else {
            tracing::debug!(previous_id, "Refresh token already revoked, rotation abandoned");
            tx.rollback().await?;
            return Ok(None);
        };

        let insert = format!(
            "INSERT INTO refresh_tokens (user_id, token_hash, jwt_id, expires_at, created_by_ip)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COLUMNS}"
        );
        let current = sqlx::query_as::<_, RefreshToken>(&insert)
            .bind(successor.user_id)
            .bind(&successor.token_hash)
            .bind(&successor.jwt_id)
            .bind(successor.expires_at)
            .bind(&successor.created_by_ip)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(RotatedPair { previous, current }))
    }

    /// Revoke every live token of a user. Returns the count of revoked rows.
    pub async fn revoke_all_for_user(
        pool: &PgPool,
        user_id: DbId,
        reason: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = true, revoked_at = NOW(), revocation_reason = $2
             WHERE user_id = $1 AND is_revoked = false",
        )
        .bind(user_id)
        .bind(reason)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete tokens that expired before `cutoff`. Returns the count of deleted rows.
    pub async fn delete_expired_before(
        pool: &PgPool,
        cutoff: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

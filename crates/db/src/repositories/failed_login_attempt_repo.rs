//! Repository for the `failed_login_attempts` table.

use gatekeeper_core::types::Timestamp;
use sqlx::PgPool;

use crate::models::failed_login_attempt::{CreateFailedLoginAttempt, FailedLoginAttempt};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, username, ip_address, user_agent, reason, attempt_time";

/// Provides data access for failed login attempts.
pub struct FailedLoginAttemptRepo;

impl FailedLoginAttemptRepo {
    /// Append a failed attempt, returning the created row.
    pub async fn create(
        pool: &PgPool,
        input: &CreateFailedLoginAttempt,
    ) -> Result<FailedLoginAttempt, sqlx::Error> {
        let query = format!(
            "INSERT INTO failed_login_attempts (username, ip_address, user_agent, reason)
             VALUES ($1, $2, $3, $4)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, FailedLoginAttempt>(&query)
            .bind(&input.username)
            .bind(&input.ip_address)
            .bind(&input.user_agent)
            .bind(&input.reason)
            .fetch_one(pool)
            .await
    }

    /// Count attempts from `ip_address` at or after `since`.
    pub async fn count_since(
        pool: &PgPool,
        ip_address: &str,
        since: Timestamp,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM failed_login_attempts
             WHERE ip_address = $1 AND attempt_time >= $2",
        )
        .bind(ip_address)
        .bind(since)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// List the most recent attempts, newest first.
    pub async fn list_recent(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<FailedLoginAttempt>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM failed_login_attempts
             ORDER BY attempt_time DESC, id DESC
             LIMIT $1"
        );
        sqlx::query_as::<_, FailedLoginAttempt>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Delete attempts older than `cutoff`. Returns the count of deleted rows.
    pub async fn delete_before(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM failed_login_attempts WHERE attempt_time < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

//! Repository for the `user_sessions` table.

use gatekeeper_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::session::{CreateUserSession, UserSession};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, user_id, ip_address, user_agent, device_type, browser, os, location, \
                       created_at, last_activity, expires_at, is_active, session_token, jwt_id";

/// Provides data access for user sessions.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert a session while keeping the user at or below `max_active`.
    ///
    /// Least-recently-active sessions are deactivated first, in the same
    /// transaction. A per-user advisory lock serializes concurrent logins of
    /// the same user. Returns the new row and the evicted rows.
    pub async fn create_capped(
        pool: &PgPool,
        input: &CreateUserSession,
        max_active: i64,
    ) -> Result<(UserSession, Vec<UserSession>), sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(input.user_id)
            .execute(&mut *tx)
            .await?;

        let active: Vec<(DbId,)> = sqlx::query_as(
            "SELECT id FROM user_sessions
             WHERE user_id = $1 AND is_active = true
             ORDER BY last_activity ASC, id ASC",
        )
        .bind(input.user_id)
        .fetch_all(&mut *tx)
        .await?;

        let excess = (active.len() as i64 + 1 - max_active.max(1)).max(0) as usize;
        let victims: Vec<DbId> = active.iter().take(excess).map(|(id,)| *id).collect();

        let evicted = if victims.is_empty() {
            Vec::new()
        } else {
            let query = format!(
                "UPDATE user_sessions SET is_active = false
                 WHERE id = ANY($1)
                 RETURNING {COLUMNS}"
            );
            sqlx::query_as::<_, UserSession>(&query)
                .bind(&victims)
                .fetch_all(&mut *tx)
                .await?
        };

        let insert = format!(
            "INSERT INTO user_sessions
                (user_id, ip_address, user_agent, device_type, browser, os, location,
                 expires_at, session_token, jwt_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {COLUMNS}"
        );
        let session = sqlx::query_as::<_, UserSession>(&insert)
            .bind(input.user_id)
            .bind(&input.ip_address)
            .bind(&input.user_agent)
            .bind(&input.device_type)
            .bind(&input.browser)
            .bind(&input.os)
            .bind(&input.location)
            .bind(input.expires_at)
            .bind(&input.session_token)
            .bind(&input.jwt_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((session, evicted))
    }

    /// Find a session by internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<UserSession>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM user_sessions WHERE id = $1");
        sqlx::query_as::<_, UserSession>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find the active session of `user_id` backed by access token `jwt_id`.
    pub async fn find_active_by_jwt_id(
        pool: &PgPool,
        user_id: DbId,
        jwt_id: &str,
    ) -> Result<Option<UserSession>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM user_sessions
             WHERE user_id = $1 AND jwt_id = $2 AND is_active = true"
        );
        sqlx::query_as::<_, UserSession>(&query)
            .bind(user_id)
            .bind(jwt_id)
            .fetch_optional(pool)
            .await
    }

    /// List a user's active sessions, most recently active first.
    pub async fn list_active_for_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<UserSession>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM user_sessions
             WHERE user_id = $1 AND is_active = true
             ORDER BY last_activity DESC, id DESC"
        );
        sqlx::query_as::<_, UserSession>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Deactivate a session only if it is active and owned by `user_id`.
    ///
    /// Returns `true` if the row was updated.
    pub async fn deactivate_owned(
        pool: &PgPool,
        id: DbId,
        user_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = false
             WHERE id = $1 AND user_id = $2 AND is_active = true",
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deactivate every active session of a user except the current one.
    ///
    /// The current session is the row whose `jwt_id` equals `except_jwt_id`;
    /// rows without a `jwt_id` are matched on `except_session_id` instead.
    /// Returns the count of deactivated rows.
    pub async fn deactivate_all_except(
        pool: &PgPool,
        user_id: DbId,
        except_jwt_id: Option<&str>,
        except_session_id: Option<DbId>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = false
             WHERE user_id = $1 AND is_active = true
               AND NOT (
                    ($2::TEXT IS NOT NULL AND jwt_id IS NOT NULL AND jwt_id = $2)
                 OR ($3::BIGINT IS NOT NULL AND jwt_id IS NULL AND id = $3)
               )",
        )
        .bind(user_id)
        .bind(except_jwt_id)
        .bind(except_session_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Deactivate the active session of `user_id` backed by `jwt_id`.
    pub async fn deactivate_by_jwt_id(
        pool: &PgPool,
        user_id: DbId,
        jwt_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = false
             WHERE user_id = $1 AND jwt_id = $2 AND is_active = true",
        )
        .bind(user_id)
        .bind(jwt_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record activity and slide the expiry. No-op for inactive sessions.
    pub async fn touch(
        pool: &PgPool,
        id: DbId,
        now: Timestamp,
        expires_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET last_activity = $2, expires_at = $3
             WHERE id = $1 AND is_active = true",
        )
        .bind(id)
        .bind(now)
        .bind(expires_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Point an active session at a new access token.
    pub async fn set_jwt_id(pool: &PgPool, id: DbId, jwt_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET jwt_id = $2 WHERE id = $1 AND is_active = true",
        )
        .bind(id)
        .bind(jwt_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deactivate sessions whose expiry has passed. Returns the count of rows.
    pub async fn deactivate_expired(pool: &PgPool, now: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = false
             WHERE is_active = true AND expires_at <= $1",
        )
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

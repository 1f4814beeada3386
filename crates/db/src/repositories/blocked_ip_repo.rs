//! Repository for the `blocked_ips` table.

use gatekeeper_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::blocked_ip::{BlockedIp, CreateBlockedIp};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, ip_address, blocked_at, expires_at, reason, failed_attempts, \
                       is_permanent, is_active";

/// Provides data access for IP blocks.
pub struct BlockedIpRepo;

impl BlockedIpRepo {
    /// Insert an active block.
    ///
    /// Fails with a `uq_blocked_ips_active_ip` unique violation if the address
    /// already has an active block.
    pub async fn create(pool: &PgPool, input: &CreateBlockedIp) -> Result<BlockedIp, sqlx::Error> {
        let query = format!(
            "INSERT INTO blocked_ips (ip_address, expires_at, reason, failed_attempts, is_permanent)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BlockedIp>(&query)
            .bind(&input.ip_address)
            .bind(input.expires_at)
            .bind(&input.reason)
            .bind(input.failed_attempts)
            .bind(input.is_permanent)
            .fetch_one(pool)
            .await
    }

    /// Find the active block for an address, expired or not.
    pub async fn find_active(
        pool: &PgPool,
        ip_address: &str,
    ) -> Result<Option<BlockedIp>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM blocked_ips WHERE ip_address = $1 AND is_active = true");
        sqlx::query_as::<_, BlockedIp>(&query)
            .bind(ip_address)
            .fetch_optional(pool)
            .await
    }

    /// List active blocks, newest first.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<BlockedIp>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM blocked_ips WHERE is_active = true ORDER BY blocked_at DESC"
        );
        sqlx::query_as::<_, BlockedIp>(&query).fetch_all(pool).await
    }

    /// Deactivate a block by ID. Returns `true` if the row was updated.
    pub async fn deactivate(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE blocked_ips SET is_active = false WHERE id = $1 AND is_active = true")
                .bind(id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deactivate the active block of an address. Returns `true` if one existed.
    pub async fn deactivate_for_ip(pool: &PgPool, ip_address: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE blocked_ips SET is_active = false WHERE ip_address = $1 AND is_active = true",
        )
        .bind(ip_address)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deactivate temporary blocks that lapsed before `now`.
    pub async fn deactivate_expired(pool: &PgPool, now: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE blocked_ips SET is_active = false
             WHERE is_active = true AND is_permanent = false AND expires_at <= $1",
        )
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

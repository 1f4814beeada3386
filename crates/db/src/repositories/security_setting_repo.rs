//! Repository for the `security_settings` table.

use sqlx::PgPool;

use crate::models::security_setting::SecuritySettingRow;

/// Provides data access for persisted setting overrides.
pub struct SecuritySettingRepo;

impl SecuritySettingRepo {
    /// List every persisted override.
    pub async fn list(pool: &PgPool) -> Result<Vec<SecuritySettingRow>, sqlx::Error> {
        sqlx::query_as::<_, SecuritySettingRow>(
            "SELECT key, value, updated_at FROM security_settings ORDER BY key",
        )
        .fetch_all(pool)
        .await
    }

    /// Upsert a batch of `(key, value)` pairs within a transaction.
    pub async fn upsert_many(pool: &PgPool, entries: &[(&str, String)]) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(
                "INSERT INTO security_settings (key, value) VALUES ($1, $2)
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

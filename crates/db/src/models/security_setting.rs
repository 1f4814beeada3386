//! Persisted security setting override.

use gatekeeper_core::types::Timestamp;
use sqlx::FromRow;

/// A row from the `security_settings` table.
#[derive(Debug, Clone, FromRow)]
pub struct SecuritySettingRow {
    pub key: String,
    pub value: String,
    pub updated_at: Timestamp,
}

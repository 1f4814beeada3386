//! Read-only view of the user directory.

use gatekeeper_core::types::DbId;
use sqlx::FromRow;

/// A row from the `users` table.
///
/// Contains the password hash -- never serialize this to API responses.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: DbId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub security_stamp: String,
    pub is_active: bool,
}

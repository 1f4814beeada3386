//! Well-known role and permission names.
//!
//! These must match the seed data in `20260301000001_create_user_directory.sql`.

pub const ROLE_ADMIN: &str = "admin";

/// Grants access to IP blocking and session configuration endpoints
/// without the full admin role.
pub const PERMISSION_SECURITY_MANAGE: &str = "security.manage";

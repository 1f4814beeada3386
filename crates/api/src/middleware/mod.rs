//! Request extractors.
//!
//! - [`auth::AuthToken`] -- Validated bearer token claims.
//! - [`auth::AuthUser`] -- Authenticated user whose token still has a live session.
//! - [`rbac::RequireSecurityAdmin`] -- Requires `admin` or the `security.manage` permission.
//! - [`client::ClientContext`] -- Client address and user agent.

pub mod auth;
pub mod client;
pub mod rbac;

//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` as the first argument.

pub mod blocked_ip_repo;
pub mod failed_login_attempt_repo;
pub mod refresh_token_repo;
pub mod security_setting_repo;
pub mod session_repo;
pub mod user_repo;

pub use blocked_ip_repo::BlockedIpRepo;
pub use failed_login_attempt_repo::FailedLoginAttemptRepo;
pub use refresh_token_repo::RefreshTokenRepo;
pub use security_setting_repo::SecuritySettingRepo;
pub use session_repo::SessionRepo;
pub use user_repo::UserRepo;

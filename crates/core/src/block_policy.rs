//! IP block decisions.
//!
//! Pure functions over counts and timestamps; the API-side `IpBlocker` feeds
//! them from the store under its own lock.

use chrono::Duration;

use crate::settings::SecuritySettings;
use crate::types::Timestamp;

/// Reason recorded on blocks created by the failure threshold.
pub const AUTO_BLOCK_REASON: &str = "Too many failed login attempts";

/// Start of the trailing window in which failures count towards a block.
pub fn failure_window_start(now: Timestamp, settings: &SecuritySettings) -> Timestamp {
    now - settings.block_duration()
}

/// Whether `recent_failures` warrants a new automatic block.
///
/// Never true while a block is already active, so crossing the threshold
/// again does not stack blocks.
pub fn should_block(
    recent_failures: i64,
    already_blocked: bool,
    settings: &SecuritySettings,
) -> bool {
    settings.enable_ip_blocking
        && !already_blocked
        && recent_failures >= i64::from(settings.suspicious_activity_threshold)
}

/// Expiry for a new block. `None` duration means permanent.
pub fn block_expiry(now: Timestamp, duration_minutes: Option<i64>) -> Option<Timestamp> {
    duration_minutes.map(|mins| now + Duration::minutes(mins))
}

/// Whether an active block row is still in force at `now`.
pub fn is_in_force(is_permanent: bool, expires_at: Option<Timestamp>, now: Timestamp) -> bool {
    if is_permanent {
        return true;
    }
    match expires_at {
        Some(expiry) => expiry > now,
        None => true,
    }
}

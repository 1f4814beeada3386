//! Typed security settings.
//!
//! Operators tune these at runtime, so they are data, not constants. The API
//! crate seeds a [`SecuritySettings`] from the environment, overlays rows
//! persisted in the `security_settings` table, and swaps in a new value on
//! every update. Dynamic lookups by name go through [`SecuritySettings::get`]
//! and [`SecuritySettings::set`]; there is no other stringly-typed access.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

/// Setting names as stored in the `security_settings` table.
pub mod keys {
    pub const MAX_CONCURRENT_SESSIONS: &str = "max_concurrent_sessions";
    pub const SESSION_TIMEOUT_MINUTES: &str = "session_timeout_minutes";
    pub const ENABLE_IP_BLOCKING: &str = "enable_ip_blocking";
    pub const SUSPICIOUS_ACTIVITY_THRESHOLD: &str = "suspicious_activity_threshold";
    pub const BLOCK_DURATION_MINUTES: &str = "block_duration_minutes";
    pub const FAILED_ATTEMPT_RETENTION_DAYS: &str = "failed_attempt_retention_days";

    pub const ALL: [&str; 6] = [
        MAX_CONCURRENT_SESSIONS,
        SESSION_TIMEOUT_MINUTES,
        ENABLE_IP_BLOCKING,
        SUSPICIOUS_ACTIVITY_THRESHOLD,
        BLOCK_DURATION_MINUTES,
        FAILED_ATTEMPT_RETENTION_DAYS,
    ];
}

pub const DEFAULT_MAX_CONCURRENT_SESSIONS: u32 = 5;
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: i64 = 60;
pub const DEFAULT_SUSPICIOUS_ACTIVITY_THRESHOLD: u32 = 5;
pub const DEFAULT_BLOCK_DURATION_MINUTES: i64 = 30;
pub const DEFAULT_FAILED_ATTEMPT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SecuritySettings {
    #[validate(range(min = 1, max = 100))]
    pub max_concurrent_sessions: u32,
    /// Sliding inactivity timeout; `touch` pushes `expires_at` this far out.
    #[validate(range(min = 1, max = 43200))]
    pub session_timeout_minutes: i64,
    pub enable_ip_blocking: bool,
    #[validate(range(min = 1, max = 1000))]
    pub suspicious_activity_threshold: u32,
    /// Length of an automatic block, and also the trailing window in which
    /// failures are counted towards the threshold.
    #[validate(range(min = 1, max = 525600))]
    pub block_duration_minutes: i64,
    #[validate(range(min = 1, max = 3650))]
    pub failed_attempt_retention_days: i64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            session_timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
            enable_ip_blocking: true,
            suspicious_activity_threshold: DEFAULT_SUSPICIOUS_ACTIVITY_THRESHOLD,
            block_duration_minutes: DEFAULT_BLOCK_DURATION_MINUTES,
            failed_attempt_retention_days: DEFAULT_FAILED_ATTEMPT_RETENTION_DAYS,
        }
    }
}

/// Partial update accepted by `PUT /session/configuration`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecuritySettingsUpdate {
    pub max_concurrent_sessions: Option<u32>,
    pub session_timeout_minutes: Option<i64>,
    pub enable_ip_blocking: Option<bool>,
    pub suspicious_activity_threshold: Option<u32>,
    pub block_duration_minutes: Option<i64>,
    pub failed_attempt_retention_days: Option<i64>,
}

impl SecuritySettings {
    pub fn session_timeout(&self) -> Duration {
        Duration::minutes(self.session_timeout_minutes)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::minutes(self.block_duration_minutes)
    }

    pub fn failed_attempt_retention(&self) -> Duration {
        Duration::days(self.failed_attempt_retention_days)
    }

    /// Run range validation, flattening failures into one message.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate().map_err(|errors| {
            let mut fields: Vec<String> = errors
                .field_errors()
                .keys()
                .map(|field| field.to_string())
                .collect();
            fields.sort();
            CoreError::Validation(format!("Out-of-range settings: {}", fields.join(", ")))
        })
    }

    /// Look a setting up by its stored name.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            keys::MAX_CONCURRENT_SESSIONS => self.max_concurrent_sessions.to_string(),
            keys::SESSION_TIMEOUT_MINUTES => self.session_timeout_minutes.to_string(),
            keys::ENABLE_IP_BLOCKING => self.enable_ip_blocking.to_string(),
            keys::SUSPICIOUS_ACTIVITY_THRESHOLD => self.suspicious_activity_threshold.to_string(),
            keys::BLOCK_DURATION_MINUTES => self.block_duration_minutes.to_string(),
            keys::FAILED_ATTEMPT_RETENTION_DAYS => self.failed_attempt_retention_days.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Set a setting from its stored string form.
    ///
    /// Parses only; call [`check`](Self::check) afterwards to enforce ranges.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), CoreError> {
        let value = value.trim();
        match key {
            keys::MAX_CONCURRENT_SESSIONS => self.max_concurrent_sessions = parse(key, value)?,
            keys::SESSION_TIMEOUT_MINUTES => self.session_timeout_minutes = parse(key, value)?,
            keys::ENABLE_IP_BLOCKING => self.enable_ip_blocking = parse(key, value)?,
            keys::SUSPICIOUS_ACTIVITY_THRESHOLD => {
                self.suspicious_activity_threshold = parse(key, value)?
            }
            keys::BLOCK_DURATION_MINUTES => self.block_duration_minutes = parse(key, value)?,
            keys::FAILED_ATTEMPT_RETENTION_DAYS => {
                self.failed_attempt_retention_days = parse(key, value)?
            }
            other => {
                return Err(CoreError::Validation(format!("Unknown setting '{other}'")));
            }
        }
        Ok(())
    }

    /// Every setting as `(key, value)` pairs, in [`keys::ALL`] order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        keys::ALL
            .iter()
            .filter_map(|key| self.get(key).map(|value| (*key, value)))
            .collect()
    }

    /// Return a copy with `update` applied, validated as a whole.
    pub fn merged(&self, update: &SecuritySettingsUpdate) -> Result<Self, CoreError> {
        let mut next = self.clone();
        if let Some(v) = update.max_concurrent_sessions {
            next.max_concurrent_sessions = v;
        }
        if let Some(v) = update.session_timeout_minutes {
            next.session_timeout_minutes = v;
        }
        if let Some(v) = update.enable_ip_blocking {
            next.enable_ip_blocking = v;
        }
        if let Some(v) = update.suspicious_activity_threshold {
            next.suspicious_activity_threshold = v;
        }
        if let Some(v) = update.block_duration_minutes {
            next.block_duration_minutes = v;
        }
        if let Some(v) = update.failed_attempt_retention_days {
            next.failed_attempt_retention_days = v;
        }
        next.check()?;
        Ok(next)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CoreError> {
    value
        .parse()
        .map_err(|_| CoreError::Validation(format!("Invalid value '{value}' for setting '{key}'")))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SecuritySettings::default().check().is_ok());
    }

    #[test]
    fn get_and_set_round_trip_every_key() {
        let settings = SecuritySettings::default();
        let mut copy = SecuritySettings {
            max_concurrent_sessions: 1,
            session_timeout_minutes: 1,
            enable_ip_blocking: false,
            suspicious_activity_threshold: 1,
            block_duration_minutes: 1,
            failed_attempt_retention_days: 1,
        };
        for (key, value) in settings.entries() {
            copy.set(key, &value).expect("stored value should parse");
        }
        assert_eq!(copy, settings);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut settings = SecuritySettings::default();
        assert_eq!(settings.get("colour_scheme"), None);
        assert_matches!(
            settings.set("colour_scheme", "dark"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn unparsable_value_is_rejected() {
        let mut settings = SecuritySettings::default();
        assert_matches!(
            settings.set(keys::MAX_CONCURRENT_SESSIONS, "many"),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            settings.set(keys::ENABLE_IP_BLOCKING, "yes"),
            Err(CoreError::Validation(_))
        );
        assert_eq!(settings, SecuritySettings::default());
    }

    #[test]
    fn set_trims_whitespace() {
        let mut settings = SecuritySettings::default();
        settings.set(keys::BLOCK_DURATION_MINUTES, " 45 ").unwrap();
        assert_eq!(settings.block_duration_minutes, 45);
    }

    #[test]
    fn merged_applies_only_present_fields() {
        let base = SecuritySettings::default();
        let update = SecuritySettingsUpdate {
            max_concurrent_sessions: Some(2),
            enable_ip_blocking: Some(false),
            ..Default::default()
        };
        let next = base.merged(&update).unwrap();
        assert_eq!(next.max_concurrent_sessions, 2);
        assert!(!next.enable_ip_blocking);
        assert_eq!(next.session_timeout_minutes, base.session_timeout_minutes);
    }

    #[test]
    fn merged_rejects_out_of_range_values() {
        let update = SecuritySettingsUpdate {
            max_concurrent_sessions: Some(0),
            block_duration_minutes: Some(-5),
            ..Default::default()
        };
        let err = SecuritySettings::default().merged(&update).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) => {
            assert!(msg.contains("max_concurrent_sessions"));
            assert!(msg.contains("block_duration_minutes"));
        });
    }

    #[test]
    fn durations_follow_settings() {
        let settings = SecuritySettings::default();
        assert_eq!(settings.session_timeout(), Duration::minutes(60));
        assert_eq!(settings.block_duration(), Duration::minutes(30));
        assert_eq!(settings.failed_attempt_retention(), Duration::days(30));
    }
}

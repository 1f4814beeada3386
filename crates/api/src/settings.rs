//! Runtime security settings.
//!
//! [`SettingsService`] holds the current [`SecuritySettings`] behind an
//! `RwLock`. It is seeded from the environment, overlaid with the persisted
//! `security_settings` rows at startup, and replaced wholesale on update so
//! readers never observe a half-applied change.

use std::sync::Arc;

use gatekeeper_core::settings::{SecuritySettings, SecuritySettingsUpdate};
use gatekeeper_db::store::SettingsStore;
use tokio::sync::RwLock;

use crate::error::AppResult;

pub struct SettingsService {
    current: RwLock<SecuritySettings>,
    store: Arc<dyn SettingsStore>,
}

impl SettingsService {
    /// Overlay persisted rows on `defaults`.
    ///
    /// Unknown keys and unparsable values are skipped with a warning. If the
    /// overlaid result fails range validation the defaults are used as-is.
    pub async fn load(
        store: Arc<dyn SettingsStore>,
        defaults: SecuritySettings,
    ) -> AppResult<Self> {
        let rows = store.load_settings().await?;

        let mut settings = defaults.clone();
        for row in &rows {
            if let Err(e) = settings.set(&row.key, &row.value) {
                tracing::warn!(key = %row.key, value = %row.value, error = %e, "Ignoring persisted setting");
            }
        }
        if let Err(e) = settings.check() {
            tracing::warn!(error = %e, "Persisted settings out of range, using defaults");
            settings = defaults;
        }

        tracing::info!(overrides = rows.len(), "Security settings loaded");
        Ok(Self::with_settings(store, settings))
    }

    pub fn with_settings(store: Arc<dyn SettingsStore>, settings: SecuritySettings) -> Self {
        Self {
            current: RwLock::new(settings),
            store,
        }
    }

    /// Snapshot of the current settings.
    pub async fn current(&self) -> SecuritySettings {
        self.current.read().await.clone()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.current.read().await.get(key)
    }

    /// Validate, persist, then publish `update`.
    ///
    /// The write lock is held across the save so concurrent updates apply
    /// in order and a failed save leaves the published value untouched.
    pub async fn update(&self, update: &SecuritySettingsUpdate) -> AppResult<SecuritySettings> {
        let mut current = self.current.write().await;
        let next = current.merged(update)?;
        self.store.save_settings(&next.entries()).await?;
        *current = next.clone();
        tracing::info!(settings = ?next, "Security settings updated");
        Ok(next)
    }
}

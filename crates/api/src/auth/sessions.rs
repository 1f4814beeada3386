//! Per-device session tracking.
//!
//! One [`UserSession`] per authenticated device, correlated with the access
//! token it was last issued through `jwt_id`. The store enforces the
//! concurrent-session cap transactionally on insert.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use gatekeeper_core::tokens::generate_session_token;
use gatekeeper_core::types::{DbId, Timestamp};
use gatekeeper_core::user_agent;
use gatekeeper_db::models::session::{CreateUserSession, UserSession};
use gatekeeper_db::store::SessionStore;
use serde::Serialize;

use crate::auth::geo::GeoLocator;
use crate::error::AppResult;
use crate::settings::SettingsService;

/// Aggregate view of a user's active sessions.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatistics {
    pub active_sessions: usize,
    pub max_sessions: u32,
    pub by_device_type: BTreeMap<String, usize>,
    pub by_browser: BTreeMap<String, usize>,
    pub oldest_activity: Option<Timestamp>,
    pub newest_activity: Option<Timestamp>,
}

pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    settings: Arc<SettingsService>,
    geo: Arc<dyn GeoLocator>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        settings: Arc<SettingsService>,
        geo: Arc<dyn GeoLocator>,
    ) -> Self {
        Self {
            store,
            settings,
            geo,
        }
    }

    /// Open a session, evicting the least recently active ones over the cap.
    ///
    /// Returns the new session and any sessions evicted to make room.
    pub async fn create(
        &self,
        user_id: DbId,
        ip: &str,
        user_agent: Option<&str>,
        jwt_id: Option<&str>,
    ) -> AppResult<(UserSession, Vec<UserSession>)> {
        let settings = self.settings.current().await;
        let device = user_agent::parse(user_agent);
        let location = self.geo.locate(ip).await;

        let input = CreateUserSession {
            user_id,
            ip_address: ip.to_string(),
            user_agent: user_agent.map(str::to_string),
            device_type: device.device_type,
            browser: device.browser,
            os: device.os,
            location,
            expires_at: Utc::now() + settings.session_timeout(),
            session_token: generate_session_token(),
            jwt_id: jwt_id.map(str::to_string),
        };

        let (session, evicted) = self
            .store
            .insert_session_capped(&input, i64::from(settings.max_concurrent_sessions))
            .await?;

        for old in &evicted {
            tracing::warn!(
                user_id,
                session_id = old.id,
                max = settings.max_concurrent_sessions,
                "Session evicted by concurrent session limit",
            );
        }
        tracing::info!(user_id, session_id = session.id, ip, "Session created");
        Ok((session, evicted))
    }

    /// End one of the requester's sessions. `false` if it is not theirs or
    /// already inactive.
    pub async fn terminate(&self, session_id: DbId, requesting_user_id: DbId) -> AppResult<bool> {
        let ended = self
            .store
            .deactivate_owned_session(session_id, requesting_user_id)
            .await?;
        if ended {
            tracing::info!(user_id = requesting_user_id, session_id, "Session terminated");
        }
        Ok(ended)
    }

    /// End every active session of `user_id` except the current one.
    ///
    /// The current session is matched on `except_jwt_id`; sessions without a
    /// `jwt_id` are matched on `except_session_id` instead. Returns whether
    /// any session was ended.
    pub async fn terminate_all(
        &self,
        user_id: DbId,
        except_jwt_id: Option<&str>,
        except_session_id: Option<DbId>,
    ) -> AppResult<bool> {
        let ended = self
            .store
            .deactivate_sessions_except(user_id, except_jwt_id, except_session_id)
            .await?;
        if ended > 0 {
            tracing::info!(user_id, ended, "Other sessions terminated");
        }
        Ok(ended > 0)
    }

    /// Record activity and slide the expiry. No-op for inactive sessions.
    pub async fn touch(&self, session_id: DbId) -> AppResult<bool> {
        let settings = self.settings.current().await;
        let now = Utc::now();
        Ok(self
            .store
            .touch_session(session_id, now, now + settings.session_timeout())
            .await?)
    }

    /// Deactivate every session past its expiry.
    pub async fn sweep_expired(&self) -> AppResult<u64> {
        Ok(self.store.deactivate_expired_sessions(Utc::now()).await?)
    }

    /// Active sessions, most recently active first.
    pub async fn list_active(&self, user_id: DbId) -> AppResult<Vec<UserSession>> {
        Ok(self.store.list_active_sessions(user_id).await?)
    }

    pub async fn statistics(&self, user_id: DbId) -> AppResult<SessionStatistics> {
        let sessions = self.list_active(user_id).await?;
        let settings = self.settings.current().await;

        let mut by_device_type = BTreeMap::new();
        let mut by_browser = BTreeMap::new();
        for session in &sessions {
            *by_device_type.entry(session.device_type.clone()).or_insert(0) += 1;
            *by_browser.entry(session.browser.clone()).or_insert(0) += 1;
        }

        Ok(SessionStatistics {
            active_sessions: sessions.len(),
            max_sessions: settings.max_concurrent_sessions,
            by_device_type,
            by_browser,
            oldest_activity: sessions.iter().map(|s| s.last_activity).min(),
            newest_activity: sessions.iter().map(|s| s.last_activity).max(),
        })
    }

    /// End the session backing access token `jwt_id`.
    pub async fn end_current(&self, user_id: DbId, jwt_id: &str) -> AppResult<bool> {
        Ok(self
            .store
            .deactivate_session_by_jwt_id(user_id, jwt_id)
            .await?)
    }

    /// The active, unexpired session backing access token `jwt_id`.
    pub async fn find_for_token(
        &self,
        user_id: DbId,
        jwt_id: &str,
    ) -> AppResult<Option<UserSession>> {
        let now = Utc::now();
        Ok(self
            .store
            .find_session_by_jwt_id(user_id, jwt_id)
            .await?
            .filter(|s| s.is_active && s.expires_at > now))
    }

    /// Move the session backing `old_jwt_id` onto `new_jwt_id`.
    pub async fn rebind(&self, user_id: DbId, old_jwt_id: &str, new_jwt_id: &str) -> AppResult<bool> {
        match self.store.find_session_by_jwt_id(user_id, old_jwt_id).await? {
            Some(session) => Ok(self.store.set_session_jwt_id(session.id, new_jwt_id).await?),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use gatekeeper_core::network::LOCAL_NETWORK;
    use gatekeeper_core::settings::SecuritySettings;
    use gatekeeper_db::store::MemoryStore;

    use super::*;
    use crate::auth::geo::DisabledGeoLocator;

    const FIREFOX: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0";

    fn registry(store: &Arc<MemoryStore>, max: u32) -> SessionRegistry {
        let settings = SecuritySettings {
            max_concurrent_sessions: max,
            ..Default::default()
        };
        SessionRegistry::new(
            store.clone(),
            Arc::new(SettingsService::with_settings(store.clone(), settings)),
            Arc::new(DisabledGeoLocator),
        )
    }

    #[tokio::test]
    async fn create_records_device_and_location() {
        let store = Arc::new(MemoryStore::new());
        let sessions = registry(&store, 5);

        let (session, evicted) = sessions
            .create(1, "192.168.1.4", Some(FIREFOX), Some("jti-1"))
            .await
            .unwrap();
        assert!(evicted.is_empty());
        assert_eq!(session.browser, "Firefox 121");
        assert_eq!(session.os, "Windows 10");
        assert_eq!(session.device_type, "Desktop");
        assert_eq!(session.location, LOCAL_NETWORK);
        assert!(session.expires_at > session.last_activity);
    }

    #[tokio::test]
    async fn cap_evicts_least_recently_active() {
        let store = Arc::new(MemoryStore::new());
        let sessions = registry(&store, 2);

        let (first, _) = sessions.create(1, "10.0.0.1", None, Some("a")).await.unwrap();
        let (second, _) = sessions.create(1, "10.0.0.1", None, Some("b")).await.unwrap();
        // `first` becomes the most recently active.
        sessions.touch(first.id).await.unwrap();

        let (third, evicted) = sessions.create(1, "10.0.0.1", None, Some("c")).await.unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, second.id);

        let active: Vec<DbId> = sessions
            .list_active(1)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(active.len(), 2);
        assert!(active.contains(&first.id));
        assert!(active.contains(&third.id));
    }

    #[tokio::test]
    async fn terminate_fails_closed_for_other_users() {
        let store = Arc::new(MemoryStore::new());
        let sessions = registry(&store, 5);
        let (session, _) = sessions.create(1, "10.0.0.1", None, None).await.unwrap();

        assert!(!sessions.terminate(session.id, 2).await.unwrap());
        assert!(sessions.terminate(session.id, 1).await.unwrap());
        assert!(!sessions.terminate(session.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn terminate_all_spares_the_current_session() {
        let store = Arc::new(MemoryStore::new());
        let sessions = registry(&store, 5);
        let (current, _) = sessions.create(1, "10.0.0.1", None, Some("cur")).await.unwrap();
        sessions.create(1, "10.0.0.2", None, Some("x")).await.unwrap();
        sessions.create(1, "10.0.0.3", None, None).await.unwrap();

        assert!(sessions.terminate_all(1, Some("cur"), None).await.unwrap());
        let active = sessions.list_active(1).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, current.id);

        assert!(!sessions.terminate_all(1, Some("cur"), None).await.unwrap());
    }

    #[tokio::test]
    async fn legacy_session_is_matched_by_id() {
        let store = Arc::new(MemoryStore::new());
        let sessions = registry(&store, 5);
        let (legacy, _) = sessions.create(1, "10.0.0.1", None, None).await.unwrap();
        sessions.create(1, "10.0.0.2", None, Some("x")).await.unwrap();

        sessions.terminate_all(1, None, Some(legacy.id)).await.unwrap();
        let active = sessions.list_active(1).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, legacy.id);
    }

    #[tokio::test]
    async fn rebind_follows_the_token_chain() {
        let store = Arc::new(MemoryStore::new());
        let sessions = registry(&store, 5);
        let (session, _) = sessions.create(1, "10.0.0.1", None, Some("old")).await.unwrap();

        assert!(sessions.rebind(1, "old", "new").await.unwrap());
        assert!(sessions.find_for_token(1, "old").await.unwrap().is_none());
        assert_eq!(
            sessions.find_for_token(1, "new").await.unwrap().map(|s| s.id),
            Some(session.id)
        );

        assert!(sessions.end_current(1, "new").await.unwrap());
        assert!(sessions.find_for_token(1, "new").await.unwrap().is_none());
        assert!(!sessions.end_current(1, "new").await.unwrap());
    }

    #[tokio::test]
    async fn statistics_break_down_active_sessions() {
        let store = Arc::new(MemoryStore::new());
        let sessions = registry(&store, 5);
        sessions.create(1, "10.0.0.1", Some(FIREFOX), None).await.unwrap();
        sessions.create(1, "10.0.0.2", Some(FIREFOX), None).await.unwrap();
        sessions.create(1, "10.0.0.3", None, None).await.unwrap();

        let stats = sessions.statistics(1).await.unwrap();
        assert_eq!(stats.active_sessions, 3);
        assert_eq!(stats.max_sessions, 5);
        assert_eq!(stats.by_browser.get("Firefox 121"), Some(&2));
        assert_eq!(stats.by_device_type.values().sum::<usize>(), 3);
        assert!(stats.oldest_activity <= stats.newest_activity);
    }

    #[tokio::test]
    async fn sweep_deactivates_only_expired_sessions() {
        let store = Arc::new(MemoryStore::new());
        let sessions = registry(&store, 5);
        sessions.create(1, "10.0.0.1", None, None).await.unwrap();

        assert_eq!(sessions.sweep_expired().await.unwrap(), 0);
        assert_eq!(sessions.list_active(1).await.unwrap().len(), 1);
    }
}

//! In-process store.
//!
//! All state sits behind one `tokio::sync::Mutex`, so each trait method is a
//! single critical section and behaves like a committed transaction. Unique
//! constraints of the schema are enforced by hand and reported with the same
//! constraint names PostgreSQL would use.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use gatekeeper_core::tokens::revocation;
use gatekeeper_core::types::{DbId, Timestamp};
use tokio::sync::Mutex;

use super::{
    LoginAttemptStore, RefreshTokenStore, SessionStore, SettingsStore, Store, StoreError,
    StoreResult,
};
use crate::models::blocked_ip::{BlockedIp, CreateBlockedIp};
use crate::models::failed_login_attempt::{CreateFailedLoginAttempt, FailedLoginAttempt};
use crate::models::refresh_token::{CreateRefreshToken, RefreshToken, RotatedPair};
use crate::models::security_setting::SecuritySettingRow;
use crate::models::session::{CreateUserSession, UserSession};

#[derive(Default)]
struct Inner {
    next_id: DbId,
    refresh_tokens: Vec<RefreshToken>,
    sessions: Vec<UserSession>,
    attempts: Vec<FailedLoginAttempt>,
    blocks: Vec<BlockedIp>,
    settings: BTreeMap<String, SecuritySettingRow>,
}

impl Inner {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn push_refresh_token(&mut self, input: &CreateRefreshToken) -> StoreResult<RefreshToken> {
        if self
            .refresh_tokens
            .iter()
            .any(|t| t.token_hash == input.token_hash)
        {
            return Err(StoreError::Conflict("uq_refresh_tokens_token_hash".into()));
        }
        let row = RefreshToken {
            id: self.next_id(),
            user_id: input.user_id,
            token_hash: input.token_hash.clone(),
            jwt_id: input.jwt_id.clone(),
            expires_at: input.expires_at,
            is_revoked: false,
            revoked_at: None,
            revocation_reason: None,
            created_by_ip: input.created_by_ip.clone(),
            last_used_by_ip: None,
            last_used_at: None,
            use_count: 0,
            created_at: Utc::now(),
        };
        self.refresh_tokens.push(row.clone());
        Ok(row)
    }
}

/// Store kept entirely in memory. State is lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every refresh token row of a user, oldest first.
    pub async fn refresh_tokens_for_user(&self, user_id: DbId) -> Vec<RefreshToken> {
        let inner = self.inner.lock().await;
        inner
            .refresh_tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert_refresh_token(&self, input: &CreateRefreshToken) -> StoreResult<RefreshToken> {
        self.inner.lock().await.push_refresh_token(input)
    }

    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .refresh_tokens
            .iter()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn rotate_refresh_token(
        &self,
        previous_id: DbId,
        used_by_ip: Option<&str>,
        successor: &CreateRefreshToken,
    ) -> StoreResult<Option<RotatedPair>> {
        let mut inner = self.inner.lock().await;

        let live = inner
            .refresh_tokens
            .iter()
            .any(|t| t.id == previous_id && !t.is_revoked);
        if !live {
            return Ok(None);
        }

        // Insert first so a hash collision leaves the predecessor untouched.
        let current = inner.push_refresh_token(successor)?;

        let now = Utc::now();
        let Some(previous) = inner.refresh_tokens.iter_mut().find(|t| t.id == previous_id) else {
            return Ok(None);
        };
        previous.is_revoked = true;
        previous.revoked_at = Some(now);
        previous.revocation_reason = Some(revocation::ROTATED.to_string());
        previous.last_used_by_ip = used_by_ip.map(str::to_string);
        previous.last_used_at = Some(now);
        previous.use_count += 1;

        Ok(Some(RotatedPair {
            previous: previous.clone(),
            current,
        }))
    }

    async fn revoke_user_refresh_tokens(&self, user_id: DbId, reason: &str) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut count = 0;
        for token in inner
            .refresh_tokens
            .iter_mut()
            .filter(|t| t.user_id == user_id && !t.is_revoked)
        {
            token.is_revoked = true;
            token.revoked_at = Some(now);
            token.revocation_reason = Some(reason.to_string());
            count += 1;
        }
        Ok(count)
    }

    async fn purge_refresh_tokens(&self, expired_before: Timestamp) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.refresh_tokens.len();
        inner
            .refresh_tokens
            .retain(|t| t.expires_at >= expired_before);
        Ok((before - inner.refresh_tokens.len()) as u64)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session_capped(
        &self,
        input: &CreateUserSession,
        max_active: i64,
    ) -> StoreResult<(UserSession, Vec<UserSession>)> {
        let mut inner = self.inner.lock().await;

        if inner
            .sessions
            .iter()
            .any(|s| s.session_token == input.session_token)
        {
            return Err(StoreError::Conflict("uq_user_sessions_session_token".into()));
        }

        let mut active: Vec<(Timestamp, DbId)> = inner
            .sessions
            .iter()
            .filter(|s| s.user_id == input.user_id && s.is_active)
            .map(|s| (s.last_activity, s.id))
            .collect();
        active.sort();

        let excess = (active.len() as i64 + 1 - max_active.max(1)).max(0) as usize;
        let victims: Vec<DbId> = active.iter().take(excess).map(|(_, id)| *id).collect();

        let mut evicted = Vec::with_capacity(victims.len());
        for session in inner
            .sessions
            .iter_mut()
            .filter(|s| victims.contains(&s.id))
        {
            session.is_active = false;
            evicted.push(session.clone());
        }

        let now = Utc::now();
        let session = UserSession {
            id: inner.next_id(),
            user_id: input.user_id,
            ip_address: input.ip_address.clone(),
            user_agent: input.user_agent.clone(),
            device_type: input.device_type.clone(),
            browser: input.browser.clone(),
            os: input.os.clone(),
            location: input.location.clone(),
            created_at: now,
            last_activity: now,
            expires_at: input.expires_at,
            is_active: true,
            session_token: input.session_token.clone(),
            jwt_id: input.jwt_id.clone(),
        };
        inner.sessions.push(session.clone());
        Ok((session, evicted))
    }

    async fn find_session(&self, id: DbId) -> StoreResult<Option<UserSession>> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.iter().find(|s| s.id == id).cloned())
    }

    async fn find_session_by_jwt_id(
        &self,
        user_id: DbId,
        jwt_id: &str,
    ) -> StoreResult<Option<UserSession>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .iter()
            .find(|s| s.user_id == user_id && s.is_active && s.jwt_id.as_deref() == Some(jwt_id))
            .cloned())
    }

    async fn list_active_sessions(&self, user_id: DbId) -> StoreResult<Vec<UserSession>> {
        let inner = self.inner.lock().await;
        let mut sessions: Vec<UserSession> = inner
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_active)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| (b.last_activity, b.id).cmp(&(a.last_activity, a.id)));
        Ok(sessions)
    }

    async fn deactivate_owned_session(&self, id: DbId, user_id: DbId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner
            .sessions
            .iter_mut()
            .find(|s| s.id == id && s.user_id == user_id && s.is_active)
        {
            Some(session) => {
                session.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_sessions_except(
        &self,
        user_id: DbId,
        except_jwt_id: Option<&str>,
        except_session_id: Option<DbId>,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut count = 0;
        for session in inner
            .sessions
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.is_active)
        {
            let is_current = match session.jwt_id.as_deref() {
                Some(jwt_id) => except_jwt_id == Some(jwt_id),
                None => except_session_id == Some(session.id),
            };
            if !is_current {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn deactivate_session_by_jwt_id(
        &self,
        user_id: DbId,
        jwt_id: &str,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.iter_mut().find(|s| {
            s.user_id == user_id && s.is_active && s.jwt_id.as_deref() == Some(jwt_id)
        }) {
            Some(session) => {
                session.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch_session(
        &self,
        id: DbId,
        now: Timestamp,
        expires_at: Timestamp,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.iter_mut().find(|s| s.id == id && s.is_active) {
            Some(session) => {
                session.last_activity = now;
                session.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_session_jwt_id(&self, id: DbId, jwt_id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.iter_mut().find(|s| s.id == id && s.is_active) {
            Some(session) => {
                session.jwt_id = Some(jwt_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_expired_sessions(&self, now: Timestamp) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut count = 0;
        for session in inner
            .sessions
            .iter_mut()
            .filter(|s| s.is_active && s.expires_at <= now)
        {
            session.is_active = false;
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl LoginAttemptStore for MemoryStore {
    async fn insert_failed_attempt(
        &self,
        input: &CreateFailedLoginAttempt,
    ) -> StoreResult<FailedLoginAttempt> {
        let mut inner = self.inner.lock().await;
        let row = FailedLoginAttempt {
            id: inner.next_id(),
            username: input.username.clone(),
            ip_address: input.ip_address.clone(),
            user_agent: input.user_agent.clone(),
            reason: input.reason.clone(),
            attempt_time: Utc::now(),
        };
        inner.attempts.push(row.clone());
        Ok(row)
    }

    async fn count_failed_attempts_since(
        &self,
        ip_address: &str,
        since: Timestamp,
    ) -> StoreResult<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .attempts
            .iter()
            .filter(|a| a.ip_address == ip_address && a.attempt_time >= since)
            .count() as i64)
    }

    async fn recent_failed_attempts(&self, limit: i64) -> StoreResult<Vec<FailedLoginAttempt>> {
        let inner = self.inner.lock().await;
        let mut attempts = inner.attempts.clone();
        attempts.sort_by(|a, b| (b.attempt_time, b.id).cmp(&(a.attempt_time, a.id)));
        attempts.truncate(limit.max(0) as usize);
        Ok(attempts)
    }

    async fn purge_failed_attempts(&self, before: Timestamp) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let count = inner.attempts.len();
        inner.attempts.retain(|a| a.attempt_time >= before);
        Ok((count - inner.attempts.len()) as u64)
    }

    async fn find_active_block(&self, ip_address: &str) -> StoreResult<Option<BlockedIp>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .blocks
            .iter()
            .find(|b| b.ip_address == ip_address && b.is_active)
            .cloned())
    }

    async fn insert_block(&self, input: &CreateBlockedIp) -> StoreResult<BlockedIp> {
        let mut inner = self.inner.lock().await;
        if inner
            .blocks
            .iter()
            .any(|b| b.ip_address == input.ip_address && b.is_active)
        {
            return Err(StoreError::Conflict("uq_blocked_ips_active_ip".into()));
        }
        let row = BlockedIp {
            id: inner.next_id(),
            ip_address: input.ip_address.clone(),
            blocked_at: Utc::now(),
            expires_at: input.expires_at,
            reason: input.reason.clone(),
            failed_attempts: input.failed_attempts,
            is_permanent: input.is_permanent,
            is_active: true,
        };
        inner.blocks.push(row.clone());
        Ok(row)
    }

    async fn deactivate_block(&self, id: DbId) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.blocks.iter_mut().find(|b| b.id == id && b.is_active) {
            Some(block) => {
                block.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_block_for_ip(&self, ip_address: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner
            .blocks
            .iter_mut()
            .find(|b| b.ip_address == ip_address && b.is_active)
        {
            Some(block) => {
                block.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_active_blocks(&self) -> StoreResult<Vec<BlockedIp>> {
        let inner = self.inner.lock().await;
        let mut blocks: Vec<BlockedIp> =
            inner.blocks.iter().filter(|b| b.is_active).cloned().collect();
        blocks.sort_by(|a, b| (b.blocked_at, b.id).cmp(&(a.blocked_at, a.id)));
        Ok(blocks)
    }

    async fn deactivate_expired_blocks(&self, now: Timestamp) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut count = 0;
        for block in inner.blocks.iter_mut().filter(|b| {
            b.is_active && !b.is_permanent && b.expires_at.is_some_and(|expiry| expiry <= now)
        }) {
            block.is_active = false;
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load_settings(&self) -> StoreResult<Vec<SecuritySettingRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.settings.values().cloned().collect())
    }

    async fn save_settings(&self, entries: &[(&str, String)]) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        for (key, value) in entries {
            inner.settings.insert(
                key.to_string(),
                SecuritySettingRow {
                    key: key.to_string(),
                    value: value.clone(),
                    updated_at: now,
                },
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use chrono::Duration;

    use super::*;

    fn token_input(user_id: DbId, hash: &str) -> CreateRefreshToken {
        CreateRefreshToken {
            user_id,
            token_hash: hash.to_string(),
            jwt_id: format!("jti-{hash}"),
            expires_at: Utc::now() + Duration::days(7),
            created_by_ip: Some("203.0.113.1".to_string()),
        }
    }

    fn session_input(user_id: DbId, token: &str, jwt_id: Option<&str>) -> CreateUserSession {
        CreateUserSession {
            user_id,
            ip_address: "203.0.113.1".to_string(),
            user_agent: None,
            device_type: "Desktop".to_string(),
            browser: "Firefox 121".to_string(),
            os: "Linux".to_string(),
            location: "Unknown".to_string(),
            expires_at: Utc::now() + Duration::minutes(60),
            session_token: token.to_string(),
            jwt_id: jwt_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn rotation_revokes_predecessor_and_links_successor() {
        let store = MemoryStore::new();
        let first = store.insert_refresh_token(&token_input(1, "a")).await.unwrap();

        let pair = store
            .rotate_refresh_token(first.id, Some("198.51.100.2"), &token_input(1, "b"))
            .await
            .unwrap()
            .expect("live token should rotate");

        assert!(pair.previous.is_revoked);
        assert_eq!(pair.previous.revocation_reason.as_deref(), Some("rotated"));
        assert_eq!(pair.previous.last_used_by_ip.as_deref(), Some("198.51.100.2"));
        assert_eq!(pair.previous.use_count, 1);
        assert!(!pair.current.is_revoked);
        assert_eq!(pair.current.user_id, 1);
    }

    #[tokio::test]
    async fn rotating_a_revoked_token_writes_nothing() {
        let store = MemoryStore::new();
        let first = store.insert_refresh_token(&token_input(1, "a")).await.unwrap();
        store
            .rotate_refresh_token(first.id, None, &token_input(1, "b"))
            .await
            .unwrap();

        let again = store
            .rotate_refresh_token(first.id, None, &token_input(1, "c"))
            .await
            .unwrap();
        assert!(again.is_none());
        assert!(store.find_refresh_token("c").await.unwrap().is_none());
        assert_eq!(store.refresh_tokens_for_user(1).await.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_rotation_has_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let first_id = store
            .insert_refresh_token(&token_input(1, "root"))
            .await
            .unwrap()
            .id;

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .rotate_refresh_token(first_id, None, &token_input(1, &format!("next-{i}")))
                    .await
                    .unwrap()
                    .is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn duplicate_token_hash_conflicts() {
        let store = MemoryStore::new();
        store.insert_refresh_token(&token_input(1, "a")).await.unwrap();
        assert_matches!(
            store.insert_refresh_token(&token_input(2, "a")).await,
            Err(StoreError::Conflict(_))
        );
    }

    #[tokio::test]
    async fn revoke_all_only_touches_live_tokens_of_user() {
        let store = MemoryStore::new();
        let a = store.insert_refresh_token(&token_input(1, "a")).await.unwrap();
        store
            .rotate_refresh_token(a.id, None, &token_input(1, "b"))
            .await
            .unwrap();
        store.insert_refresh_token(&token_input(2, "c")).await.unwrap();

        let revoked = store
            .revoke_user_refresh_tokens(1, revocation::LOGOUT)
            .await
            .unwrap();
        assert_eq!(revoked, 1);

        let other = store.find_refresh_token("c").await.unwrap().unwrap();
        assert!(!other.is_revoked);
        let rotated = store.find_refresh_token("a").await.unwrap().unwrap();
        assert_eq!(rotated.revocation_reason.as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn session_cap_evicts_least_recently_active() {
        let store = MemoryStore::new();
        let (s1, _) = store
            .insert_session_capped(&session_input(1, "t1", Some("j1")), 2)
            .await
            .unwrap();
        let (s2, _) = store
            .insert_session_capped(&session_input(1, "t2", Some("j2")), 2)
            .await
            .unwrap();

        // s1 becomes the most recently active.
        let later = Utc::now() + Duration::seconds(5);
        store
            .touch_session(s1.id, later, later + Duration::minutes(60))
            .await
            .unwrap();

        let (_, evicted) = store
            .insert_session_capped(&session_input(1, "t3", Some("j3")), 2)
            .await
            .unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, s2.id);
        assert_eq!(store.list_active_sessions(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn terminate_all_keeps_current_session() {
        let store = MemoryStore::new();
        store
            .insert_session_capped(&session_input(1, "t1", Some("j1")), 10)
            .await
            .unwrap();
        let (legacy, _) = store
            .insert_session_capped(&session_input(1, "t2", None), 10)
            .await
            .unwrap();
        store
            .insert_session_capped(&session_input(1, "t3", Some("j3")), 10)
            .await
            .unwrap();

        let ended = store
            .deactivate_sessions_except(1, Some("j3"), Some(legacy.id))
            .await
            .unwrap();
        assert_eq!(ended, 1);

        let remaining: Vec<DbId> = store
            .list_active_sessions(1)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&legacy.id));
    }

    #[tokio::test]
    async fn owned_deactivation_checks_owner() {
        let store = MemoryStore::new();
        let (session, _) = store
            .insert_session_capped(&session_input(1, "t1", None), 5)
            .await
            .unwrap();
        assert!(!store.deactivate_owned_session(session.id, 2).await.unwrap());
        assert!(store.deactivate_owned_session(session.id, 1).await.unwrap());
        assert!(!store.deactivate_owned_session(session.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn one_active_block_per_address() {
        let store = MemoryStore::new();
        let input = CreateBlockedIp {
            ip_address: "203.0.113.9".to_string(),
            expires_at: Some(Utc::now() + Duration::minutes(30)),
            reason: "test".to_string(),
            failed_attempts: 5,
            is_permanent: false,
        };
        let block = store.insert_block(&input).await.unwrap();
        assert_matches!(store.insert_block(&input).await, Err(StoreError::Conflict(_)));

        assert!(store.deactivate_block(block.id).await.unwrap());
        assert!(store.insert_block(&input).await.is_ok());
    }

    #[tokio::test]
    async fn expired_blocks_are_swept_but_permanent_ones_stay() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_block(&CreateBlockedIp {
                ip_address: "203.0.113.1".to_string(),
                expires_at: Some(now - Duration::minutes(1)),
                reason: "lapsed".to_string(),
                failed_attempts: 5,
                is_permanent: false,
            })
            .await
            .unwrap();
        store
            .insert_block(&CreateBlockedIp {
                ip_address: "203.0.113.2".to_string(),
                expires_at: None,
                reason: "manual".to_string(),
                failed_attempts: 0,
                is_permanent: true,
            })
            .await
            .unwrap();

        assert_eq!(store.deactivate_expired_blocks(now).await.unwrap(), 1);
        let active = store.list_active_blocks().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].ip_address, "203.0.113.2");
    }

    #[tokio::test]
    async fn settings_upsert_overwrites() {
        let store = MemoryStore::new();
        store
            .save_settings(&[("max_concurrent_sessions", "3".to_string())])
            .await
            .unwrap();
        store
            .save_settings(&[("max_concurrent_sessions", "4".to_string())])
            .await
            .unwrap();
        let rows = store.load_settings().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "4");
    }
}

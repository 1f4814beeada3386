//! Login, refresh, logout and cached-token retrieval.
//!
//! [`AuthOrchestrator`] is the only component that touches every other auth
//! service. Handlers call it; it never calls handlers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use gatekeeper_core::claims::build_claims;
use gatekeeper_core::error::CoreError;
use gatekeeper_core::tokens::revocation;
use gatekeeper_core::types::{DbId, Timestamp};
use tokio::sync::Mutex;

use crate::auth::credentials::{CredentialVerifier, Verification};
use crate::auth::ip_blocker::IpBlocker;
use crate::auth::jwt::TokenIssuer;
use crate::auth::refresh_tokens::{RefreshTokenService, RotationError};
use crate::auth::reuse::ReuseDetector;
use crate::auth::sessions::SessionRegistry;
use crate::auth::token_cache::{CachedToken, SlotKey, TokenCache, TokenKind};
use crate::error::{AppError, AppResult};

/// Returned for every credential failure, whatever the cause.
pub const INVALID_CREDENTIALS: &str = "Invalid username or password";

/// Cached access tokens closer than this to expiry are refreshed instead.
const ACCESS_TOKEN_MARGIN_SECS: i64 = 30;

/// A login request plus the client it came from.
#[derive(Debug, Clone, Copy)]
pub struct LoginAttempt<'a> {
    pub username: &'a str,
    pub password: &'a str,
    /// Client-chosen id under which later calls can find this slot.
    pub device_id: Option<&'a str>,
    pub ip: &'a str,
    pub user_agent: Option<&'a str>,
}

/// A freshly issued token pair.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user_id: DbId,
    pub access_token: String,
    pub access_expires_at: Timestamp,
    pub refresh_token: String,
    pub refresh_expires_at: Timestamp,
    pub roles: Vec<String>,
    pub session_id: DbId,
}

pub struct AuthOrchestrator {
    verifier: Arc<dyn CredentialVerifier>,
    issuer: Arc<TokenIssuer>,
    refresh_tokens: Arc<RefreshTokenService>,
    reuse: Arc<ReuseDetector>,
    ip_blocker: Arc<IpBlocker>,
    sessions: Arc<SessionRegistry>,
    cache: Arc<TokenCache>,
    /// One lock per slot being refreshed from the cache, so contexts sharing
    /// a slot never present the same refresh token twice. Entries nobody
    /// holds are dropped on the next lookup.
    refresh_locks: Mutex<HashMap<SlotKey, Arc<Mutex<()>>>>,
}

fn unauthorized(message: &str) -> AppError {
    AppError::Core(CoreError::Unauthorized(message.to_string()))
}

impl AuthOrchestrator {
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        issuer: Arc<TokenIssuer>,
        refresh_tokens: Arc<RefreshTokenService>,
        reuse: Arc<ReuseDetector>,
        ip_blocker: Arc<IpBlocker>,
        sessions: Arc<SessionRegistry>,
        cache: Arc<TokenCache>,
    ) -> Self {
        Self {
            verifier,
            issuer,
            refresh_tokens,
            reuse,
            ip_blocker,
            sessions,
            cache,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn login(&self, attempt: &LoginAttempt<'_>) -> AppResult<AuthOutcome> {
        let LoginAttempt {
            username,
            password,
            device_id,
            ip,
            user_agent,
        } = *attempt;

        if self.ip_blocker.is_blocked(ip).await? {
            tracing::warn!(ip, username, "Login refused from blocked IP");
            return Err(CoreError::TooManyRequests(
                "Too many failed login attempts. Try again later.".into(),
            )
            .into());
        }

        let principal = match self.verifier.verify(username, password).await? {
            Verification::Verified(principal) => principal,
            Verification::Rejected(failure) => {
                let blocked = self
                    .ip_blocker
                    .record_failure(username, ip, user_agent, failure.as_str())
                    .await?;
                tracing::info!(ip, username, reason = failure.as_str(), blocked, "Login failed");
                return Err(unauthorized(INVALID_CREDENTIALS));
            }
        };

        let user_id = principal.identity.id;
        let claims = build_claims(&principal.identity, &principal.roles, &principal.permissions);
        let access = self.issuer.issue_access(&claims)?;
        let (refresh_row, refresh_token) = self
            .refresh_tokens
            .create(user_id, &access.jwt_id, Some(ip), user_agent)
            .await?;
        let (session, evicted) = self
            .sessions
            .create(user_id, ip, user_agent, Some(&access.jwt_id))
            .await?;

        for old in &evicted {
            self.cache
                .remove_slot(&SlotKey::new(user_id, old.id.to_string()))
                .await;
        }

        let key = SlotKey::new(user_id, session.id.to_string());
        self.cache_pair(&key, &access.token, access.expires_at, &refresh_token, refresh_row.expires_at)
            .await;
        if let Some(device_id) = device_id {
            self.cache.register_context(device_id, key).await;
        }

        tracing::info!(user_id, session_id = session.id, ip, "User logged in");
        Ok(AuthOutcome {
            user_id,
            access_token: access.token,
            access_expires_at: access.expires_at,
            refresh_token,
            refresh_expires_at: refresh_row.expires_at,
            roles: claims.roles,
            session_id: session.id,
        })
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// Not idempotent: the presented token is consumed even if a later step
    /// fails, and presenting it again is treated as reuse.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> AppResult<AuthOutcome> {
        if !self.reuse.can_use(refresh_token).await {
            return Err(unauthorized("Refresh token has already been used"));
        }

        let row = match self.refresh_tokens.inspect(refresh_token).await {
            Ok(row) => row,
            Err(RotationError::Revoked { user_id, reason }) if reason == revocation::ROTATED => {
                self.reuse.revoke_chain(user_id).await;
                return Err(RotationError::Revoked { user_id, reason }.into());
            }
            Err(e) => return Err(e.into()),
        };
        let user_id = row.user_id;

        let Some(session) = self.sessions.find_for_token(user_id, &row.jwt_id).await? else {
            return Err(unauthorized("Session is no longer active"));
        };
        let Some(principal) = self.verifier.load_principal(user_id).await? else {
            return Err(unauthorized("Account is no longer active"));
        };

        let claims = build_claims(&principal.identity, &principal.roles, &principal.permissions);
        let access = self.issuer.issue_access(&claims)?;

        let rotation = match self
            .refresh_tokens
            .rotate_from(&row, &access.jwt_id, ip, user_agent)
            .await
        {
            Ok(rotation) => rotation,
            Err(RotationError::AlreadyRotated { user_id }) => {
                self.reuse.revoke_chain(user_id).await;
                return Err(RotationError::AlreadyRotated { user_id }.into());
            }
            Err(e) => return Err(e.into()),
        };

        self.sessions
            .rebind(user_id, &row.jwt_id, &access.jwt_id)
            .await?;
        self.sessions.touch(session.id).await?;

        let key = SlotKey::new(user_id, session.id.to_string());
        self.cache_pair(
            &key,
            &access.token,
            access.expires_at,
            &rotation.plaintext,
            rotation.current.expires_at,
        )
        .await;

        tracing::debug!(user_id, session_id = session.id, "Token pair refreshed");
        Ok(AuthOutcome {
            user_id,
            access_token: access.token,
            access_expires_at: access.expires_at,
            refresh_token: rotation.plaintext,
            refresh_expires_at: rotation.current.expires_at,
            roles: claims.roles,
            session_id: session.id,
        })
    }

    /// A usable access token for the slot that `user_id` registered
    /// `context_id` to.
    ///
    /// Serves the cached token while it has more than 30 seconds left,
    /// otherwise rotates with the cached refresh token. A slot with no
    /// usable refresh token means the caller must log in again.
    pub async fn get_valid_token(&self, user_id: DbId, context_id: &str) -> AppResult<CachedToken> {
        let key = self
            .cache
            .resolve_context(user_id, context_id)
            .await
            .ok_or_else(|| unauthorized("Unknown token context"))?;
        let margin = Duration::seconds(ACCESS_TOKEN_MARGIN_SECS);

        if let Some(access) = self.fresh_access(&key, margin).await {
            return Ok(access);
        }

        let slot_lock = self.slot_lock(&key).await;
        let _guard = slot_lock.lock().await;
        // Another context may have refreshed while we waited.
        if let Some(access) = self.fresh_access(&key, margin).await {
            return Ok(access);
        }

        let Some(refresh) = self.cache.get(&key, TokenKind::Refresh).await else {
            self.cache.remove_slot(&key).await;
            return Err(unauthorized("Session expired, please log in again"));
        };

        match self.refresh(&refresh.token, None, None).await {
            Ok(outcome) => Ok(CachedToken {
                token: outcome.access_token,
                expires_at: outcome.access_expires_at,
            }),
            Err(e) => {
                self.cache.remove_slot(&key).await;
                Err(e)
            }
        }
    }

    /// Revoke every refresh token of `user_id`, end the session backing
    /// `jwt_id`, and clear the user's cache slots. Safe to repeat.
    pub async fn logout(&self, user_id: DbId, jwt_id: &str) -> AppResult<()> {
        let revoked = self
            .refresh_tokens
            .revoke_all(user_id, revocation::LOGOUT)
            .await?;
        let ended = self.sessions.end_current(user_id, jwt_id).await?;
        self.cache.remove_user(user_id).await;
        tracing::info!(user_id, revoked, session_ended = ended, "User logged out");
        Ok(())
    }

    async fn slot_lock(&self, key: &SlotKey) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.clone()).or_default().clone()
    }

    async fn fresh_access(&self, key: &SlotKey, margin: Duration) -> Option<CachedToken> {
        self.cache
            .get(key, TokenKind::Access)
            .await
            .filter(|token| token.valid_for(margin))
    }

    async fn cache_pair(
        &self,
        key: &SlotKey,
        access: &str,
        access_expires_at: Timestamp,
        refresh: &str,
        refresh_expires_at: Timestamp,
    ) {
        self.cache
            .set(
                key,
                TokenKind::Access,
                CachedToken {
                    token: access.to_string(),
                    expires_at: access_expires_at,
                },
            )
            .await;
        self.cache
            .set(
                key,
                TokenKind::Refresh,
                CachedToken {
                    token: refresh.to_string(),
                    expires_at: refresh_expires_at,
                },
            )
            .await;
    }
}

//! Refresh-token replay detection.
//!
//! Every refresh token value presented for rotation is recorded in a
//! short-lived ledger as a keyed hash. Seeing the same value again inside the
//! ledger's TTL means the token was stolen or replayed: every refresh token
//! of its owner is revoked, every session ended and every cached token
//! dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use gatekeeper_core::hashing::keyed_hash_hex;
use gatekeeper_core::tokens::revocation;
use gatekeeper_core::types::{DbId, Timestamp};
use tokio::sync::Mutex;

use crate::auth::refresh_tokens::RefreshTokenService;
use crate::auth::sessions::SessionRegistry;
use crate::auth::token_cache::TokenCache;

pub struct ReuseDetector {
    key: Vec<u8>,
    ttl: Duration,
    ledger: Mutex<HashMap<String, Timestamp>>,
    tokens: Arc<RefreshTokenService>,
    sessions: Arc<SessionRegistry>,
    cache: Arc<TokenCache>,
}

impl ReuseDetector {
    pub fn new(
        key: &[u8],
        ttl_hours: i64,
        tokens: Arc<RefreshTokenService>,
        sessions: Arc<SessionRegistry>,
        cache: Arc<TokenCache>,
    ) -> Self {
        Self {
            key: key.to_vec(),
            ttl: Duration::hours(ttl_hours),
            ledger: Mutex::new(HashMap::new()),
            tokens,
            sessions,
            cache,
        }
    }

    /// Record `value` and report whether this is its first use.
    ///
    /// On replay the owner's refresh tokens are revoked and `false` is
    /// returned, even if the revocation itself fails.
    pub async fn can_use(&self, value: &str) -> bool {
        let digest = keyed_hash_hex(&self.key, value.as_bytes());
        let now = Utc::now();

        let replayed = {
            let mut ledger = self.ledger.lock().await;
            match ledger.get(&digest) {
                Some(seen) if now - *seen < self.ttl => true,
                _ => {
                    ledger.insert(digest, now);
                    false
                }
            }
        };
        if !replayed {
            return true;
        }

        match self.tokens.find_owner(value).await {
            Ok(Some(user_id)) => self.revoke_chain(user_id).await,
            Ok(None) => tracing::warn!("Replayed refresh token has no owner"),
            Err(e) => tracing::error!(error = %e, "Owner lookup failed during reuse handling"),
        }
        false
    }

    /// Cut `user_id` off after a detected replay: revoke every refresh
    /// token, end every session (which invalidates outstanding access
    /// tokens) and drop the user's cached tokens.
    pub async fn revoke_chain(&self, user_id: DbId) {
        tracing::warn!(user_id, "Refresh token reuse detected, revoking all tokens");
        if let Err(e) = self
            .tokens
            .revoke_all(user_id, revocation::REUSE_DETECTED)
            .await
        {
            tracing::error!(user_id, error = %e, "Failed to revoke tokens after reuse");
        }
        if let Err(e) = self.sessions.terminate_all(user_id, None, None).await {
            tracing::error!(user_id, error = %e, "Failed to end sessions after reuse");
        }
        self.cache.remove_user(user_id).await;
    }

    /// Drop ledger entries older than the TTL. Returns how many were dropped.
    pub async fn prune(&self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let mut ledger = self.ledger.lock().await;
        let before = ledger.len();
        ledger.retain(|_, seen| *seen > cutoff);
        before - ledger.len()
    }

    pub async fn ledger_size(&self) -> usize {
        self.ledger.lock().await.len()
    }
}

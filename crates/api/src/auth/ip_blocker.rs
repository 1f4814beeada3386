//! Failed-login tracking and IP blocking.
//!
//! Thresholds are read from [`SettingsService`] on every call. The
//! count-then-block sequence runs under a process-local mutex; across
//! processes the store's one-active-block-per-IP rule decides the winner.

use std::sync::Arc;

use chrono::Utc;
use gatekeeper_core::block_policy::{
    block_expiry, failure_window_start, is_in_force, should_block, AUTO_BLOCK_REASON,
};
use gatekeeper_core::error::CoreError;
use gatekeeper_core::network::{canonical_ip, UNKNOWN_ADDRESS};
use gatekeeper_core::types::Timestamp;
use gatekeeper_db::models::blocked_ip::{BlockedIp, CreateBlockedIp};
use gatekeeper_db::models::failed_login_attempt::{CreateFailedLoginAttempt, FailedLoginAttempt};
use gatekeeper_db::store::{LoginAttemptStore, StoreError};
use tokio::sync::Mutex;

use crate::error::AppResult;
use crate::settings::SettingsService;

/// Default and maximum page sizes for the failed-login listing.
pub const DEFAULT_FAILURE_LIMIT: i64 = 50;
pub const MAX_FAILURE_LIMIT: i64 = 500;

pub struct IpBlocker {
    store: Arc<dyn LoginAttemptStore>,
    settings: Arc<SettingsService>,
    lock: Mutex<()>,
}

impl IpBlocker {
    pub fn new(store: Arc<dyn LoginAttemptStore>, settings: Arc<SettingsService>) -> Self {
        Self {
            store,
            settings,
            lock: Mutex::new(()),
        }
    }

    /// Whether logins from `ip` are currently refused.
    pub async fn is_blocked(&self, ip: &str) -> AppResult<bool> {
        if !self.settings.current().await.enable_ip_blocking {
            return Ok(false);
        }
        Ok(self.active_block(ip, Utc::now()).await?.is_some())
    }

    /// The block in force for `ip`, deactivating a lapsed one on the way.
    async fn active_block(&self, ip: &str, now: Timestamp) -> AppResult<Option<BlockedIp>> {
        let Some(block) = self.store.find_active_block(ip).await? else {
            return Ok(None);
        };
        if is_in_force(block.is_permanent, block.expires_at, now) {
            return Ok(Some(block));
        }
        self.store.deactivate_block(block.id).await?;
        tracing::info!(ip, block_id = block.id, "Expired IP block lifted");
        Ok(None)
    }

    /// Record a failed login and block `ip` once it crosses the threshold.
    ///
    /// Returns `true` if this call created a block.
    pub async fn record_failure(
        &self,
        username: &str,
        ip: &str,
        user_agent: Option<&str>,
        reason: &str,
    ) -> AppResult<bool> {
        let _guard = self.lock.lock().await;

        self.store
            .insert_failed_attempt(&CreateFailedLoginAttempt {
                username: username.to_string(),
                ip_address: ip.to_string(),
                user_agent: user_agent.map(str::to_string),
                reason: reason.to_string(),
            })
            .await?;

        // Every unidentifiable client shares this address.
        if ip == UNKNOWN_ADDRESS {
            return Ok(false);
        }

        let settings = self.settings.current().await;
        let now = Utc::now();
        let failures = self
            .store
            .count_failed_attempts_since(ip, failure_window_start(now, &settings))
            .await?;
        let already_blocked = self.active_block(ip, now).await?.is_some();
        if !should_block(failures, already_blocked, &settings) {
            return Ok(false);
        }

        let input = CreateBlockedIp {
            ip_address: ip.to_string(),
            expires_at: block_expiry(now, Some(settings.block_duration_minutes)),
            reason: AUTO_BLOCK_REASON.to_string(),
            failed_attempts: i32::try_from(failures).unwrap_or(i32::MAX),
            is_permanent: false,
        };
        match self.store.insert_block(&input).await {
            Ok(block) => {
                tracing::warn!(
                    ip,
                    failures,
                    expires_at = ?block.expires_at,
                    "IP blocked after repeated login failures",
                );
                Ok(true)
            }
            // Another instance blocked it first.
            Err(StoreError::Conflict(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Block `ip` on an operator's behalf. `None` duration blocks permanently.
    pub async fn block_manually(
        &self,
        ip: &str,
        reason: &str,
        duration_minutes: Option<i64>,
    ) -> AppResult<BlockedIp> {
        let ip = canonical_ip(ip)?;
        if matches!(duration_minutes, Some(mins) if mins <= 0) {
            return Err(CoreError::Validation("duration_minutes must be positive".into()).into());
        }

        let _guard = self.lock.lock().await;
        let now = Utc::now();
        if self.active_block(&ip, now).await?.is_some() {
            return Err(CoreError::Conflict(format!("IP address {ip} is already blocked")).into());
        }

        let input = CreateBlockedIp {
            ip_address: ip.clone(),
            expires_at: block_expiry(now, duration_minutes),
            reason: reason.to_string(),
            failed_attempts: 0,
            is_permanent: duration_minutes.is_none(),
        };
        let block = match self.store.insert_block(&input).await {
            Ok(block) => block,
            Err(StoreError::Conflict(_)) => {
                return Err(
                    CoreError::Conflict(format!("IP address {ip} is already blocked")).into(),
                );
            }
            Err(e) => return Err(e.into()),
        };

        tracing::warn!(ip = %ip, permanent = block.is_permanent, reason, "IP blocked manually");
        Ok(block)
    }

    /// Lift the active block on `ip`.
    pub async fn unblock(&self, ip: &str) -> AppResult<()> {
        let ip = canonical_ip(ip)?;
        if !self.store.deactivate_block_for_ip(&ip).await? {
            return Err(CoreError::NotFound {
                entity: "BlockedIp",
                id: ip,
            }
            .into());
        }
        tracing::info!(ip = %ip, "IP unblocked");
        Ok(())
    }

    /// Blocks currently in force.
    pub async fn list_active_blocks(&self) -> AppResult<Vec<BlockedIp>> {
        let now = Utc::now();
        let blocks = self.store.list_active_blocks().await?;
        Ok(blocks
            .into_iter()
            .filter(|b| is_in_force(b.is_permanent, b.expires_at, now))
            .collect())
    }

    /// Most recent failed attempts, newest first. `limit` is clamped to
    /// `1..=MAX_FAILURE_LIMIT`.
    pub async fn recent_failures(&self, limit: Option<i64>) -> AppResult<Vec<FailedLoginAttempt>> {
        let limit = limit
            .unwrap_or(DEFAULT_FAILURE_LIMIT)
            .clamp(1, MAX_FAILURE_LIMIT);
        Ok(self.store.recent_failed_attempts(limit).await?)
    }

    /// Deactivate every block whose expiry has passed.
    pub async fn lift_expired_blocks(&self) -> AppResult<u64> {
        Ok(self.store.deactivate_expired_blocks(Utc::now()).await?)
    }

    /// Delete failed attempts older than the retention setting.
    pub async fn purge_old_attempts(&self) -> AppResult<u64> {
        let settings = self.settings.current().await;
        Ok(self
            .store
            .purge_failed_attempts(Utc::now() - settings.failed_attempt_retention())
            .await?)
    }
}

//! Periodic retention cleanup.
//!
//! Lifts lapsed IP blocks, deletes failed login attempts past the retention
//! setting, deletes long-expired refresh tokens, and prunes the reuse
//! ledger. Each step runs whether or not the others succeed.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::auth::ip_blocker::IpBlocker;
use crate::auth::refresh_tokens::RefreshTokenService;
use crate::auth::reuse::ReuseDetector;
use crate::error::AppResult;
use crate::state::AppState;

/// What one pass removed, and which steps failed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    pub expired_blocks: u64,
    pub purged_attempts: u64,
    pub purged_tokens: u64,
    pub pruned_ledger: usize,
    pub failed_steps: Vec<&'static str>,
}

impl RetentionReport {
    fn removed_anything(&self) -> bool {
        self.expired_blocks + self.purged_attempts + self.purged_tokens > 0
            || self.pruned_ledger > 0
    }

    /// Fold a step's result in, recording the step as failed on error.
    fn record(&mut self, step: &'static str, result: AppResult<u64>) -> u64 {
        match result {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(step, error = %e, "Retention: step failed");
                self.failed_steps.push(step);
                0
            }
        }
    }
}

/// The services a retention pass works on.
pub struct Retention {
    ip_blocker: Arc<IpBlocker>,
    refresh_tokens: Arc<RefreshTokenService>,
    reuse: Arc<ReuseDetector>,
    token_retention: chrono::Duration,
}

impl Retention {
    pub fn new(
        ip_blocker: Arc<IpBlocker>,
        refresh_tokens: Arc<RefreshTokenService>,
        reuse: Arc<ReuseDetector>,
        token_retention: chrono::Duration,
    ) -> Self {
        Self {
            ip_blocker,
            refresh_tokens,
            reuse,
            token_retention,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.ip_blocker.clone(),
            state.refresh_tokens.clone(),
            state.reuse.clone(),
            chrono::Duration::days(state.config.refresh_token_retention_days),
        )
    }

    /// Run every step once.
    pub async fn run_once(&self) -> RetentionReport {
        let mut report = RetentionReport::default();

        let lifted = self.ip_blocker.lift_expired_blocks().await;
        report.expired_blocks = report.record("expired_blocks", lifted);

        let purged = self.ip_blocker.purge_old_attempts().await;
        report.purged_attempts = report.record("failed_attempts", purged);

        let purged = self.refresh_tokens.purge_expired(self.token_retention).await;
        report.purged_tokens = report.record("refresh_tokens", purged);

        report.pruned_ledger = self.reuse.prune().await;

        if report.removed_anything() {
            tracing::info!(
                expired_blocks = report.expired_blocks,
                purged_attempts = report.purged_attempts,
                purged_tokens = report.purged_tokens,
                pruned_ledger = report.pruned_ledger,
                "Retention: purged old rows",
            );
        } else if report.failed_steps.is_empty() {
            tracing::debug!("Retention: nothing to purge");
        }
        report
    }
}

/// Run one cleanup pass over the application's services.
pub async fn cleanup_once(state: &AppState) -> RetentionReport {
    Retention::from_state(state).run_once().await
}

/// Run the retention loop until `cancel` is triggered.
pub async fn run(state: AppState, cancel: CancellationToken) {
    let period = Duration::from_secs(state.config.retention_sweep_interval_secs.max(1));
    tracing::info!(
        interval_secs = period.as_secs(),
        refresh_token_retention_days = state.config.refresh_token_retention_days,
        "Retention job started"
    );

    let retention = Retention::from_state(&state);
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Retention job stopping");
                break;
            }
            _ = interval.tick() => {
                let report = retention.run_once().await;
                if !report.failed_steps.is_empty() {
                    tracing::warn!(failed = ?report.failed_steps, "Retention: pass incomplete");
                }
            }
        }
    }
}

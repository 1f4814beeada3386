//! Periodic session expiry sweep.
//!
//! Deactivates sessions past their `expires_at` and drops expired entries
//! from the token cache.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::AppResult;
use crate::state::AppState;

/// Run one sweep. Returns the number of sessions deactivated.
pub async fn sweep_once(state: &AppState) -> AppResult<u64> {
    let expired = state.sessions.sweep_expired().await?;
    let purged_slots = state.token_cache.purge_expired().await;
    if expired > 0 || purged_slots > 0 {
        tracing::info!(expired, purged_slots, "Session sweep: expired sessions closed");
    } else {
        tracing::debug!("Session sweep: nothing expired");
    }
    Ok(expired)
}

/// Run the session sweep loop until `cancel` is triggered.
pub async fn run(state: AppState, cancel: CancellationToken) {
    let period = Duration::from_secs(state.config.session_sweep_interval_secs.max(1));
    tracing::info!(interval_secs = period.as_secs(), "Session sweep job started");

    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Session sweep job stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = sweep_once(&state).await {
                    tracing::error!(error = %e, "Session sweep: failed");
                }
            }
        }
    }
}

//! Tests for the periodic sweep and retention jobs.

mod common;

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use common::{build_test_app, login, ADMIN};
use gatekeeper_api::background::{retention, session_sweep};
use gatekeeper_db::models::blocked_ip::CreateBlockedIp;
use gatekeeper_db::models::session::CreateUserSession;
use gatekeeper_db::store::{LoginAttemptStore, SessionStore};
use tokio_util::sync::CancellationToken;

fn lapsed_session(user_id: i64) -> CreateUserSession {
    CreateUserSession {
        user_id,
        ip_address: "10.0.0.5".to_string(),
        user_agent: None,
        device_type: "Unknown".to_string(),
        browser: "Unknown".to_string(),
        os: "Unknown".to_string(),
        location: "Local Network".to_string(),
        expires_at: Utc::now() - Duration::minutes(1),
        session_token: "lapsed-session".to_string(),
        jwt_id: Some("lapsed-jti".to_string()),
    }
}

#[tokio::test]
async fn sweep_closes_lapsed_sessions_only() {
    let app = build_test_app();
    login(&app.router, ADMIN).await;
    app.store
        .insert_session_capped(&lapsed_session(1), 10)
        .await
        .unwrap();

    assert_eq!(session_sweep::sweep_once(&app.state).await.unwrap(), 1);
    assert_eq!(session_sweep::sweep_once(&app.state).await.unwrap(), 0);

    let active = app.store.list_active_sessions(1).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_ne!(active[0].session_token, "lapsed-session");
}

#[tokio::test]
async fn retention_lifts_lapsed_blocks() {
    let app = build_test_app();
    app.store
        .insert_block(&CreateBlockedIp {
            ip_address: "203.0.113.20".to_string(),
            expires_at: Some(Utc::now() - Duration::minutes(1)),
            reason: "Too many failed login attempts".to_string(),
            failed_attempts: 5,
            is_permanent: false,
        })
        .await
        .unwrap();
    app.store
        .insert_block(&CreateBlockedIp {
            ip_address: "203.0.113.21".to_string(),
            expires_at: None,
            reason: "Abuse".to_string(),
            failed_attempts: 0,
            is_permanent: true,
        })
        .await
        .unwrap();

    let report = retention::cleanup_once(&app.state).await;
    assert!(report.failed_steps.is_empty());
    assert_eq!(report.expired_blocks, 1);

    assert!(app
        .store
        .find_active_block("203.0.113.20")
        .await
        .unwrap()
        .is_none());
    assert!(app
        .store
        .find_active_block("203.0.113.21")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn jobs_stop_when_cancelled() {
    let app = build_test_app();
    let cancel = CancellationToken::new();
    let sweep = tokio::spawn(session_sweep::run(app.state.clone(), cancel.clone()));
    let retention = tokio::spawn(retention::run(app.state.clone(), cancel.clone()));

    cancel.cancel();
    let joined = tokio::time::timeout(StdDuration::from_secs(5), async {
        sweep.await.unwrap();
        retention.await.unwrap();
    })
    .await;
    assert!(joined.is_ok());
}

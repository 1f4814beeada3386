//! PostgreSQL repository tests.
//!
//! Each test gets a fresh database from `#[sqlx::test]`, created through
//! the server named by `DATABASE_URL`.

use chrono::{Duration, Utc};
use gatekeeper_core::tokens::revocation;
use gatekeeper_core::types::DbId;
use gatekeeper_db::models::blocked_ip::CreateBlockedIp;
use gatekeeper_db::models::failed_login_attempt::CreateFailedLoginAttempt;
use gatekeeper_db::models::refresh_token::CreateRefreshToken;
use gatekeeper_db::models::session::CreateUserSession;
use gatekeeper_db::repositories::{
    BlockedIpRepo, FailedLoginAttemptRepo, RefreshTokenRepo, SecuritySettingRepo, SessionRepo,
};
use sqlx::PgPool;

async fn create_user(pool: &PgPool, username: &str) -> DbId {
    let (id,): (DbId,) = sqlx::query_as(
        "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, 'x') RETURNING id",
    )
    .bind(username)
    .bind(format!("{username}@test.com"))
    .fetch_one(pool)
    .await
    .unwrap();
    id
}

fn token(user_id: DbId, hash: &str) -> CreateRefreshToken {
    CreateRefreshToken {
        user_id,
        token_hash: hash.to_string(),
        jwt_id: format!("jti-{hash}"),
        expires_at: Utc::now() + Duration::days(7),
        created_by_ip: None,
    }
}

fn session(user_id: DbId, token: &str) -> CreateUserSession {
    CreateUserSession {
        user_id,
        ip_address: "203.0.113.1".to_string(),
        user_agent: None,
        device_type: "Desktop".to_string(),
        browser: "Unknown".to_string(),
        os: "Unknown".to_string(),
        location: "Unknown".to_string(),
        expires_at: Utc::now() + Duration::minutes(60),
        session_token: token.to_string(),
        jwt_id: Some(format!("jti-{token}")),
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn rotation_is_single_use(pool: PgPool) {
    let user_id = create_user(&pool, "rotator").await;
    let first = RefreshTokenRepo::create(&pool, &token(user_id, "h1")).await.unwrap();

    let pair = RefreshTokenRepo::rotate(&pool, first.id, Some("198.51.100.1"), &token(user_id, "h2"))
        .await
        .unwrap()
        .expect("live token should rotate");
    assert_eq!(pair.previous.revocation_reason.as_deref(), Some(revocation::ROTATED));
    assert_eq!(pair.previous.use_count, 1);

    let replay = RefreshTokenRepo::rotate(&pool, first.id, None, &token(user_id, "h3"))
        .await
        .unwrap();
    assert!(replay.is_none());
    assert!(RefreshTokenRepo::find_by_hash(&pool, "h3").await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn session_cap_evicts_oldest(pool: PgPool) {
    let user_id = create_user(&pool, "capped").await;
    let (oldest, _) = SessionRepo::create_capped(&pool, &session(user_id, "s1"), 2)
        .await
        .unwrap();
    SessionRepo::create_capped(&pool, &session(user_id, "s2"), 2)
        .await
        .unwrap();

    let (_, evicted) = SessionRepo::create_capped(&pool, &session(user_id, "s3"), 2)
        .await
        .unwrap();
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].id, oldest.id);
    assert_eq!(SessionRepo::list_active_for_user(&pool, user_id).await.unwrap().len(), 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn one_active_block_per_ip(pool: PgPool) {
    let input = CreateBlockedIp {
        ip_address: "203.0.113.50".to_string(),
        expires_at: None,
        reason: "manual".to_string(),
        failed_attempts: 0,
        is_permanent: true,
    };
    BlockedIpRepo::create(&pool, &input).await.unwrap();

    let err = BlockedIpRepo::create(&pool, &input).await.unwrap_err();
    let db_err = err.as_database_error().expect("should be a database error");
    assert_eq!(db_err.constraint(), Some("uq_blocked_ips_active_ip"));

    assert!(BlockedIpRepo::deactivate_for_ip(&pool, "203.0.113.50").await.unwrap());
    assert!(BlockedIpRepo::create(&pool, &input).await.is_ok());
}

fn untracked_session(user_id: DbId, token: &str) -> CreateUserSession {
    CreateUserSession {
        jwt_id: None,
        ..session(user_id, token)
    }
}

fn attempt(ip: &str) -> CreateFailedLoginAttempt {
    CreateFailedLoginAttempt {
        username: "ada".to_string(),
        ip_address: ip.to_string(),
        user_agent: None,
        reason: "invalid_password".to_string(),
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_rotations_of_one_token_yield_one_successor(pool: PgPool) {
    let user_id = create_user(&pool, "racer").await;
    let first = RefreshTokenRepo::create(&pool, &token(user_id, "r1")).await.unwrap();

    let left = token(user_id, "r2");
    let right = token(user_id, "r3");
    let (a, b) = tokio::join!(
        RefreshTokenRepo::rotate(&pool, first.id, None, &left),
        RefreshTokenRepo::rotate(&pool, first.id, None, &right),
    );
    let winners = [a.unwrap(), b.unwrap()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].previous.use_count, 1);

    let r2 = RefreshTokenRepo::find_by_hash(&pool, "r2").await.unwrap();
    let r3 = RefreshTokenRepo::find_by_hash(&pool, "r3").await.unwrap();
    assert!(r2.is_some() ^ r3.is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn deactivate_all_except_matches_untracked_rows_by_id(pool: PgPool) {
    let user_id = create_user(&pool, "legacy").await;
    let (tracked, _) = SessionRepo::create_capped(&pool, &session(user_id, "t1"), 10)
        .await
        .unwrap();
    let (kept, _) = SessionRepo::create_capped(&pool, &untracked_session(user_id, "u1"), 10)
        .await
        .unwrap();
    let (ended, _) = SessionRepo::create_capped(&pool, &untracked_session(user_id, "u2"), 10)
        .await
        .unwrap();

    let count = SessionRepo::deactivate_all_except(&pool, user_id, Some("jti-t1"), Some(kept.id))
        .await
        .unwrap();
    assert_eq!(count, 1);

    let active: Vec<DbId> = SessionRepo::list_active_for_user(&pool, user_id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert!(active.contains(&tracked.id));
    assert!(active.contains(&kept.id));
    assert!(!active.contains(&ended.id));

    // A session id naming a tracked row does not protect it.
    let count = SessionRepo::deactivate_all_except(&pool, user_id, None, Some(tracked.id))
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn expired_sessions_are_deactivated(pool: PgPool) {
    let user_id = create_user(&pool, "sleepy").await;
    let lapsed = CreateUserSession {
        expires_at: Utc::now() - Duration::minutes(1),
        ..session(user_id, "old")
    };
    SessionRepo::create_capped(&pool, &lapsed, 10).await.unwrap();
    SessionRepo::create_capped(&pool, &session(user_id, "new"), 10)
        .await
        .unwrap();

    assert_eq!(SessionRepo::deactivate_expired(&pool, Utc::now()).await.unwrap(), 1);
    assert_eq!(SessionRepo::deactivate_expired(&pool, Utc::now()).await.unwrap(), 0);
    assert_eq!(SessionRepo::list_active_for_user(&pool, user_id).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn failed_attempts_are_counted_inside_the_window(pool: PgPool) {
    for ip in ["203.0.113.9", "203.0.113.9", "203.0.113.9", "198.51.100.1"] {
        FailedLoginAttemptRepo::create(&pool, &attempt(ip)).await.unwrap();
    }
    // Push one attempt outside a 15-minute window.
    sqlx::query(
        "UPDATE failed_login_attempts SET attempt_time = NOW() - INTERVAL '1 hour'
         WHERE id = (SELECT MIN(id) FROM failed_login_attempts)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let since = Utc::now() - Duration::minutes(15);
    let count = FailedLoginAttemptRepo::count_since(&pool, "203.0.113.9", since)
        .await
        .unwrap();
    assert_eq!(count, 2);

    let purged = FailedLoginAttemptRepo::delete_before(&pool, since).await.unwrap();
    assert_eq!(purged, 1);
    assert_eq!(FailedLoginAttemptRepo::list_recent(&pool, 10).await.unwrap().len(), 3);
}

#[sqlx::test(migrations = "./migrations")]
async fn expired_blocks_are_deactivated(pool: PgPool) {
    let lapsed = CreateBlockedIp {
        ip_address: "203.0.113.60".to_string(),
        expires_at: Some(Utc::now() - Duration::minutes(1)),
        reason: "Too many failed login attempts".to_string(),
        failed_attempts: 5,
        is_permanent: false,
    };
    let permanent = CreateBlockedIp {
        ip_address: "203.0.113.61".to_string(),
        expires_at: None,
        reason: "manual".to_string(),
        failed_attempts: 0,
        is_permanent: true,
    };
    BlockedIpRepo::create(&pool, &lapsed).await.unwrap();
    BlockedIpRepo::create(&pool, &permanent).await.unwrap();

    assert_eq!(BlockedIpRepo::deactivate_expired(&pool, Utc::now()).await.unwrap(), 1);
    let active = BlockedIpRepo::list_active(&pool).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].ip_address, "203.0.113.61");
}

#[sqlx::test(migrations = "./migrations")]
async fn settings_upsert_overwrites_existing_keys(pool: PgPool) {
    SecuritySettingRepo::upsert_many(
        &pool,
        &[
            ("max_concurrent_sessions", "5".to_string()),
            ("enable_ip_blocking", "true".to_string()),
        ],
    )
    .await
    .unwrap();
    SecuritySettingRepo::upsert_many(&pool, &[("max_concurrent_sessions", "3".to_string())])
        .await
        .unwrap();

    let rows = SecuritySettingRepo::list(&pool).await.unwrap();
    let values: Vec<(&str, &str)> = rows
        .iter()
        .map(|r| (r.key.as_str(), r.value.as_str()))
        .collect();
    assert_eq!(
        values,
        vec![("enable_ip_blocking", "true"), ("max_concurrent_sessions", "3")]
    );
}

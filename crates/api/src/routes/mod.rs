pub mod admin;
pub mod auth;
pub mod health;
pub mod session;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /auth/login                                  login (public)
/// /auth/refresh                                refresh (public)
/// /auth/logout                                 logout (requires auth)
///
/// /session/my-sessions                         list own active sessions
/// /session/my-sessions/terminate-all           end all but the current session
/// /session/statistics                          own session statistics
/// /session/configuration                       get (auth), update (security admin)
/// /session/{id}                                end one own session
///
/// /admin/blocked-ips                           list, block (security admin)
/// /admin/blocked-ips/{ip}                      unblock
/// /admin/failed-logins                         recent failed logins
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/session", session::router())
        .nest("/admin", admin::router())
}

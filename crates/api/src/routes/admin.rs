//! Route definitions for the `/admin` security surface.

use axum::routing::{delete, get};
use axum::Router;

use crate::handlers::admin;
use crate::state::AppState;

/// Routes mounted at `/admin`.
///
/// ```text
/// GET    /blocked-ips        -> list_blocked_ips
/// POST   /blocked-ips        -> block_ip
/// DELETE /blocked-ips/{ip}   -> unblock_ip
/// GET    /failed-logins      -> failed_logins (?limit=)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/blocked-ips",
            get(admin::list_blocked_ips).post(admin::block_ip),
        )
        .route("/blocked-ips/{ip}", delete(admin::unblock_ip))
        .route("/failed-logins", get(admin::failed_logins))
}

//! Route definitions for the `/session` resource.

use axum::routing::{delete, get};
use axum::Router;

use crate::handlers::session;
use crate::state::AppState;

/// Routes mounted at `/session`.
///
/// ```text
/// GET    /my-sessions                  -> my_sessions
/// DELETE /my-sessions/terminate-all    -> terminate_all (?current_session_id=)
/// GET    /statistics                   -> statistics
/// GET    /configuration                -> get_configuration
/// PUT    /configuration                -> update_configuration (security admin)
/// DELETE /{id}                         -> terminate_session
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/my-sessions", get(session::my_sessions))
        .route("/my-sessions/terminate-all", delete(session::terminate_all))
        .route("/statistics", get(session::statistics))
        .route(
            "/configuration",
            get(session::get_configuration).put(session::update_configuration),
        )
        .route("/{id}", delete(session::terminate_session))
}

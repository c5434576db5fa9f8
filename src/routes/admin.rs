use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Admin Router Module
///
/// Nested under `/admin`. The gate requires a signed-in account like for any
/// other non-public path; on top of that, operator rights come from
/// server-issued admin tokens (`AdminUser` extractor).
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // POST /admin/login
        // Server-side credential check against the configured Argon2 hash.
        .route("/login", post(handlers::admin_login))
        // GET /admin/session
        // Lets the console verify its stored token on load.
        .route("/session", get(handlers::admin_session))
}

use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Application Router Module
///
/// Every route here is evaluated by the gate first. `/auth-callback` is in the
/// public set; the `/api` routes are default-protected (any signed-in account).
/// Page routes are not listed: the SPA fallback serves them, and the gate
/// scopes `/dashboard`, `/merchant` and `/carrier` by role.
pub fn app_routes() -> Router<AppState> {
    Router::new()
        // GET /auth-callback?role=...
        // Post-sign-up landing route. Runs the role handshake, then redirects home.
        .route("/auth-callback", get(handlers::auth_callback))
        // POST /api/role
        // Server-side "set role if absent" for the caller's own account.
        .route("/api/role", post(handlers::set_role))
        // GET /api/me
        // The caller's account id and role as resolved by the gate.
        .route("/api/me", get(handlers::get_me))
}

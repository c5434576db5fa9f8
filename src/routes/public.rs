use crate::AppState;
use axum::{Router, routing::get};

/// Public Router Module
///
/// Endpoints for infrastructure rather than users. The gate lets them through
/// without a session or an identity lookup (`gate::LIVENESS_ROUTES`).
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check for load balancers. Never touches the identity provider.
        .route("/health", get(|| async { "ok" }))
}

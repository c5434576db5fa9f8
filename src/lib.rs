use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod handshake;
pub mod identity;
pub mod models;

// Routing segregated by concern: health, the application, the operator console.
// All of it sits behind the gate.
pub mod routes;
use routes::{admin, app, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::AppError;
pub use handshake::InFlight;
pub use identity::{HttpIdentityClient, IdentityService, IdentityState, InMemoryIdentityService};

/// ApiDoc
///
/// OpenAPI document for the JSON API, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth_callback, handlers::set_role, handlers::get_me,
        handlers::admin_login, handlers::admin_session
    ),
    components(
        schemas(
            models::Role, models::Account, models::PublicMetadata, models::SetRoleRequest,
            models::SetRoleResponse, models::ErrorResponse, models::UserProfile,
            models::AdminLoginRequest, models::AdminSessionResponse, models::AdminProfile,
        )
    ),
    tags(
        (name = "gathr", description = "Gathr marketplace API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container handed to every handler and to the gate.
#[derive(Clone)]
pub struct AppState {
    /// Identity provider access (HTTP client or in-memory store).
    pub identity: IdentityState,
    /// The loaded, immutable configuration.
    pub config: AppConfig,
    /// Handshakes currently running in this process.
    pub in_flight: InFlight,
}

impl AppState {
    pub fn new(identity: IdentityState, config: AppConfig) -> Self {
        Self {
            identity,
            config,
            in_flight: InFlight::default(),
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for IdentityState {
    fn from_ref(app_state: &AppState) -> IdentityState {
        app_state.identity.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routing structure. The gate wraps every route, the API docs
/// and the SPA fallback, so every path (known or not) is evaluated. `/health`
/// passes because the gate classifies it as a liveness route.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // Built SPA assets; unknown paths get index.html so client-side routing works.
    let static_dir = &state.config.static_dir;
    let spa = ServeDir::new(static_dir).fallback(ServeFile::new(static_dir.join("index.html")));

    let base_router = Router::new()
        .merge(public::public_routes())
        .merge(app::app_routes())
        .nest("/admin", admin::admin_routes())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback_service(spa)
        .layer(middleware::from_fn_with_state(state.clone(), gate::route_gate))
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for `TraceLayer` carrying method, uri and the `x-request-id`, so every
/// log line of one request (gate decision included) is correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}

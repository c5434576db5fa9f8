use gathr::{
    AppState, HttpIdentityClient, IdentityState, InMemoryIdentityService,
    auth::issue_session_token,
    config::{AppConfig, Env},
    create_router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, installs logging, picks the identity backend and
/// serves the router.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast in production)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins, otherwise sensible local defaults.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gathr=debug,tower_http=info,axum=trace".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Identity backend
    let identity: IdentityState = if config.uses_local_identity() {
        let store = InMemoryIdentityService::from_seed(&config.local_accounts);
        tracing::warn!("IDENTITY_SECRET_KEY not set, using in-memory identity store");

        // Dev convenience: print a session token per seeded account.
        // Only usable while sessions are checked against the shared secret.
        let seeded_ids = config
            .local_accounts
            .split(',')
            .filter_map(|entry| entry.split(':').next())
            .map(str::trim)
            .filter(|id| !id.is_empty() && config.session_jwt_public_key.is_none());
        for id in seeded_ids {
            match issue_session_token(id, &config.session_jwt_secret, chrono::Duration::days(1)) {
                Ok(token) => tracing::info!(user_id = id, token = %token, "local session token"),
                Err(e) => tracing::warn!(user_id = id, error = %e, "could not sign local token"),
            }
        }

        Arc::new(store)
    } else {
        let client = HttpIdentityClient::new(
            &config.identity_api_url,
            config.identity_secret_key.clone(),
            config.identity_timeout,
        )
        .expect("FATAL: Invalid IDENTITY_API_URL.");
        Arc::new(client)
    };

    match config.session_jwt_public_key {
        Some(_) => tracing::info!("verifying RS256 session tokens with the provider public key"),
        None => tracing::info!("verifying HS256 session tokens with the shared secret"),
    }

    if config.admin_password_hash.is_none() {
        tracing::warn!("ADMIN_PASSWORD_HASH not set, admin login disabled");
    }

    // 4. Router and server
    let addr = format!("0.0.0.0:{}", config.port);
    let app = create_router(AppState::new(identity, config));

    let listener = TcpListener::bind(&addr)
        .await
        .expect("FATAL: Failed to bind listener.");

    tracing::info!("Listening on {}", addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", addr);

    axum::serve(listener, app).await.expect("FATAL: Server error.");
}

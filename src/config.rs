use jsonwebtoken::DecodingKey;
use std::{env, path::PathBuf, time::Duration};

/// Fallback secrets used only outside production so a fresh checkout can run.
const LOCAL_SESSION_SECRET: &str = "gathr-local-session-secret";
const LOCAL_ADMIN_SECRET: &str = "gathr-local-admin-secret";

/// AppConfig
///
/// Holds the service configuration. Immutable once loaded and shared with the
/// handlers, the gate and the session extractors through `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls fail-fast behavior and log format.
    pub env: Env,
    // TCP port the HTTP server binds to.
    pub port: u16,
    // Base URL of the identity provider's backend API (Clerk-compatible).
    pub identity_api_url: String,
    // Secret key presented as a bearer credential to the identity provider.
    // Empty means "use the in-memory identity store".
    pub identity_secret_key: String,
    // HS256 key session tokens are signed with when no public key is set.
    pub session_jwt_secret: String,
    // PEM public key of the identity provider (RS256 session tokens). When
    // set, HS256 session tokens are no longer accepted.
    pub session_jwt_public_key: Option<String>,
    // HS256 key for server-issued admin session tokens.
    pub admin_jwt_secret: String,
    // Operator account allowed to sign in to the admin surface.
    pub admin_email: String,
    // Argon2 PHC string for the admin password. `None` disables admin login.
    pub admin_password_hash: Option<String>,
    // Upper bound on a single identity lookup made by the gate.
    pub identity_timeout: Duration,
    // Directory holding the built single-page application.
    pub static_dir: PathBuf,
    // Local only: `id[:role]` entries seeded into the in-memory identity store.
    pub local_accounts: String,
}

/// Env
///
/// Runtime context: local development or hardened production.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

impl Default for AppConfig {
    /// Non-panicking configuration used for test state scaffolding.
    fn default() -> Self {
        Self {
            env: Env::Local,
            port: 3000,
            identity_api_url: "https://api.clerk.com/v1".to_string(),
            identity_secret_key: String::new(),
            session_jwt_secret: LOCAL_SESSION_SECRET.to_string(),
            session_jwt_public_key: None,
            admin_jwt_secret: LOCAL_ADMIN_SECRET.to_string(),
            admin_email: "admin@gathr.local".to_string(),
            admin_password_hash: None,
            identity_timeout: Duration::from_millis(3000),
            static_dir: PathBuf::from("public"),
            local_accounts: String::new(),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from environment variables.
    ///
    /// # Panics
    /// Panics in production when a secret is missing, and in any environment
    /// when a numeric variable cannot be parsed. The service must not start
    /// with an incomplete or insecure configuration.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .expect("FATAL: PORT must be a valid port number");

        let identity_timeout = env::var("IDENTITY_TIMEOUT_MS")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u64>()
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .expect("FATAL: IDENTITY_TIMEOUT_MS must be a positive integer");

        // Single-line PEMs carry literal `\n` escapes.
        let session_jwt_public_key = env::var("SESSION_JWT_PUBLIC_KEY")
            .ok()
            .map(|pem| pem.replace("\\n", "\n"))
            .filter(|pem| !pem.trim().is_empty());
        if let Some(pem) = &session_jwt_public_key {
            DecodingKey::from_rsa_pem(pem.as_bytes())
                .expect("FATAL: SESSION_JWT_PUBLIC_KEY must be an RSA public key in PEM format");
        }

        let identity_api_url = env::var("IDENTITY_API_URL")
            .unwrap_or_else(|_| "https://api.clerk.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();

        let admin_email =
            env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@gathr.local".to_string());
        let admin_password_hash = env::var("ADMIN_PASSWORD_HASH")
            .ok()
            .filter(|hash| !hash.is_empty());
        let static_dir = PathBuf::from(env::var("STATIC_DIR").unwrap_or_else(|_| "public".into()));

        match env {
            Env::Local => Self {
                env: Env::Local,
                port,
                identity_api_url,
                identity_secret_key: env::var("IDENTITY_SECRET_KEY").unwrap_or_default(),
                session_jwt_secret: env::var("SESSION_JWT_SECRET")
                    .unwrap_or_else(|_| LOCAL_SESSION_SECRET.to_string()),
                session_jwt_public_key,
                admin_jwt_secret: env::var("ADMIN_JWT_SECRET")
                    .unwrap_or_else(|_| LOCAL_ADMIN_SECRET.to_string()),
                admin_email,
                admin_password_hash,
                identity_timeout,
                static_dir,
                local_accounts: env::var("LOCAL_ACCOUNTS").unwrap_or_default(),
            },
            Env::Production => Self {
                env: Env::Production,
                port,
                identity_api_url,
                identity_secret_key: env::var("IDENTITY_SECRET_KEY")
                    .expect("FATAL: IDENTITY_SECRET_KEY required in prod"),
                session_jwt_secret: match env::var("SESSION_JWT_SECRET") {
                    Ok(secret) if !secret.is_empty() => secret,
                    _ if session_jwt_public_key.is_some() => String::new(),
                    _ => panic!(
                        "FATAL: SESSION_JWT_PUBLIC_KEY or SESSION_JWT_SECRET required in prod"
                    ),
                },
                session_jwt_public_key,
                admin_jwt_secret: env::var("ADMIN_JWT_SECRET")
                    .expect("FATAL: ADMIN_JWT_SECRET required in prod"),
                admin_email,
                admin_password_hash,
                identity_timeout,
                static_dir,
                local_accounts: String::new(),
            },
        }
    }

    /// True when no identity provider credentials are configured and the
    /// in-memory store should back identity lookups.
    pub fn uses_local_identity(&self) -> bool {
        self.env == Env::Local && self.identity_secret_key.is_empty()
    }
}

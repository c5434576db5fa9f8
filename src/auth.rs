use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::AppConfig, error::AppError};

/// Cookie the identity provider's frontend SDK stores the session token in.
pub const SESSION_COOKIE: &str = "__session";

/// Lifetime of a server-issued admin session.
const ADMIN_SESSION_TTL_MINUTES: i64 = 60;

/// Claims
///
/// Payload of a session token issued by the identity provider. `sub` is the
/// provider's opaque user id; expiry is always validated.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

/// Session
///
/// A validated session: the caller's identity, not yet their role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
}

/// Candidate session tokens in the order they are tried: the
/// `Authorization: Bearer` header, then the `__session` cookie.
pub fn session_tokens(headers: &HeaderMap) -> impl Iterator<Item = &str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    let cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim());

    bearer
        .into_iter()
        .chain(cookie)
        .filter(|token| !token.is_empty())
}

/// The first session token the request carries.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    session_tokens(headers).next()
}

fn verify_with(token: &str, key: &DecodingKey, validation: &Validation) -> Option<Session> {
    match decode::<Claims>(token, key, validation) {
        Ok(data) if !data.claims.sub.is_empty() => Some(Session {
            user_id: data.claims.sub,
        }),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "session token rejected");
            None
        }
    }
}

/// Validates an HS256 session token. Any failure (bad signature, malformed,
/// expired, empty subject) yields `None`: the caller has no identity.
pub fn verify_session_token(token: &str, secret: &str) -> Option<Session> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    verify_with(token, &key, &validation)
}

/// Validates an RS256 session token signed by the identity provider, against
/// its PEM public key. Same failure semantics as `verify_session_token`.
pub fn verify_provider_session_token(token: &str, public_key_pem: &str) -> Option<Session> {
    let key = match DecodingKey::from_rsa_pem(public_key_pem.as_bytes()) {
        Ok(key) => key,
        Err(e) => {
            tracing::error!(error = %e, "provider public key unusable");
            return None;
        }
    };
    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = true;
    // Provider session tokens carry no audience.
    validation.validate_aud = false;
    verify_with(token, &key, &validation)
}

/// The single place a request's session is resolved. The gate, the handshake
/// and the `SessionUser` extractor all go through here. A configured provider
/// public key takes precedence over the shared secret. A bearer header that
/// is not a session (an admin token, say) falls through to the cookie.
pub fn resolve_session(headers: &HeaderMap, config: &AppConfig) -> Option<Session> {
    session_tokens(headers).find_map(|token| match config.session_jwt_public_key.as_deref() {
        Some(pem) => verify_provider_session_token(token, pem),
        None => verify_session_token(token, &config.session_jwt_secret),
    })
}

/// Signs an HS256 session token with the shared secret. Used by local tooling
/// and tests; production tokens come from the provider.
pub fn issue_session_token(
    user_id: &str,
    secret: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + ttl).timestamp().max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// SessionUser Extractor
///
/// Handler argument for routes that need the caller's identity. Rejects with
/// 401 when no valid session is present.
#[derive(Debug, Clone)]
pub struct SessionUser(pub Session);

impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);
        resolve_session(&parts.headers, &config)
            .map(SessionUser)
            .ok_or(AppError::Unauthorized)
    }
}

// --- Admin sessions ---

/// AdminClaims
///
/// Payload of a server-issued admin session token. Signed with a key distinct
/// from the identity provider's session secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub role: String,
    pub jti: String,
    pub exp: usize,
    pub iat: usize,
}

/// Checks operator credentials against the configured Argon2 hash.
pub fn verify_admin_credentials(
    config: &AppConfig,
    email: &str,
    password: &str,
) -> Result<(), AppError> {
    let hash = config
        .admin_password_hash
        .as_deref()
        .ok_or(AppError::AdminDisabled)?;
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("invalid ADMIN_PASSWORD_HASH: {e}")))?;

    // Verify before comparing the email so both failure paths cost the same.
    let password_ok = Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok();

    if password_ok && email.eq_ignore_ascii_case(&config.admin_email) {
        Ok(())
    } else {
        tracing::warn!(email, "admin login rejected");
        Err(AppError::Unauthorized)
    }
}

/// Issues an admin session token. Returns the token and its expiry (unix seconds).
pub fn issue_admin_token(email: &str, secret: &str) -> Result<(String, i64), AppError> {
    let now = Utc::now();
    let expires_at = (now + Duration::minutes(ADMIN_SESSION_TTL_MINUTES)).timestamp();
    let claims = AdminClaims {
        sub: email.to_string(),
        role: "admin".to_string(),
        jti: Uuid::new_v4().to_string(),
        iat: now.timestamp() as usize,
        exp: expires_at as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((token, expires_at))
}

/// AdminUser Extractor
///
/// Resolves the operator from an `Authorization: Bearer` admin token.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub email: String,
}

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        let key = DecodingKey::from_secret(config.admin_jwt_secret.as_bytes());
        let data = decode::<AdminClaims>(token, &key, &Validation::default())
            .map_err(|_| AppError::Unauthorized)?;

        if data.claims.role != "admin" {
            return Err(AppError::Unauthorized);
        }

        Ok(AdminUser {
            email: data.claims.sub,
        })
    }
}

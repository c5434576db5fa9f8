//! Route Authorization Gate.
//!
//! Every request outside the public set and the health check is resolved to
//! an identity and a role and checked against a static route-to-role table.
//! The gate holds no state between requests: a role change applies to the
//! very next request.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::{
    AppState,
    auth::resolve_session,
    config::AppConfig,
    identity::IdentityService,
    models::{Account, Role},
};

pub const HOME_ROUTE: &str = "/";
pub const SIGN_IN_ROUTE: &str = "/sign-in";
pub const SIGN_UP_ROUTE: &str = "/sign-up";
pub const AUTH_CALLBACK_ROUTE: &str = "/auth-callback";
pub const HEALTH_ROUTE: &str = "/health";

/// RoutePattern
///
/// `Exact` matches one path. `Prefix` matches the path itself and anything
/// below it on a segment boundary: `/merchant` matches `/merchant/orders`
/// but not `/merchants`. Matching is case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePattern {
    Exact(&'static str),
    Prefix(&'static str),
}

impl RoutePattern {
    pub fn matches(&self, path: &str) -> bool {
        match *self {
            RoutePattern::Exact(p) => path == p,
            RoutePattern::Prefix(p) => path
                .strip_prefix(p)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/')),
        }
    }
}

/// Reachable without an identity.
pub const PUBLIC_ROUTES: &[RoutePattern] = &[
    RoutePattern::Exact(HOME_ROUTE),
    RoutePattern::Prefix(SIGN_IN_ROUTE),
    RoutePattern::Prefix(SIGN_UP_ROUTE),
    RoutePattern::Prefix(AUTH_CALLBACK_ROUTE),
];

/// Liveness checks. Outside the application's path space: allowed
/// without an identity and without a lookup, but not part of the public set.
pub const LIVENESS_ROUTES: &[RoutePattern] = &[RoutePattern::Exact(HEALTH_ROUTE)];

/// Reachable only by accounts holding the paired role.
pub const SCOPED_ROUTES: &[(RoutePattern, Role)] = &[
    (RoutePattern::Prefix("/dashboard"), Role::Customer),
    (RoutePattern::Prefix("/merchant"), Role::Merchant),
    (RoutePattern::Prefix("/carrier"), Role::Carrier),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    Liveness,
    Scoped(Role),
    /// Any authenticated identity may proceed.
    Protected,
}

/// First match wins: public, then liveness, then scoped.
/// Expects a decoded path, see `decoded_path`.
pub fn classify(path: &str) -> RouteClass {
    if PUBLIC_ROUTES.iter().any(|pattern| pattern.matches(path)) {
        return RouteClass::Public;
    }
    if LIVENESS_ROUTES.iter().any(|pattern| pattern.matches(path)) {
        return RouteClass::Liveness;
    }

    SCOPED_ROUTES
        .iter()
        .find(|(pattern, _)| pattern.matches(path))
        .map_or(RouteClass::Protected, |(_, role)| RouteClass::Scoped(*role))
}

/// What the gate knows about the caller once the lookup has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityState {
    Anonymous,
    Authenticated { role: Option<Role> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectToSignIn,
    RedirectHome,
}

impl Decision {
    pub fn redirect_target(&self) -> Option<&'static str> {
        match self {
            Decision::Allow => None,
            Decision::RedirectToSignIn => Some(SIGN_IN_ROUTE),
            Decision::RedirectHome => Some(HOME_ROUTE),
        }
    }
}

/// authorize
///
/// Pure decision function over an already-classified route and a settled
/// identity. An authenticated account without a role is denied on scoped
/// routes like any other mismatch.
pub fn authorize(class: RouteClass, identity: &IdentityState) -> Decision {
    match (class, identity) {
        (RouteClass::Public | RouteClass::Liveness, _) => Decision::Allow,
        (_, IdentityState::Anonymous) => Decision::RedirectToSignIn,
        (RouteClass::Scoped(required), IdentityState::Authenticated { role }) => {
            if *role == Some(required) {
                Decision::Allow
            } else {
                Decision::RedirectHome
            }
        }
        (RouteClass::Protected, IdentityState::Authenticated { .. }) => Decision::Allow,
    }
}

/// The request path as the static file service sees it: percent-decoded,
/// with invalid UTF-8 replaced. `/%6Derchant` classifies as `/merchant`.
pub fn decoded_path(raw: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}

/// resolve_identity
///
/// Validates the session and performs the one identity lookup of this request,
/// bounded by the configured timeout. Every failure fails closed to
/// `Anonymous`. Returns the account alongside so handlers need not fetch it again.
pub async fn resolve_identity(
    identity: &dyn IdentityService,
    config: &AppConfig,
    headers: &HeaderMap,
) -> (IdentityState, Option<Account>) {
    let Some(session) = resolve_session(headers, config) else {
        return (IdentityState::Anonymous, None);
    };

    let lookup = identity.get_account(&session.user_id);
    match tokio::time::timeout(config.identity_timeout, lookup).await {
        Ok(Ok(Some(account))) => (
            IdentityState::Authenticated {
                role: account.role(),
            },
            Some(account),
        ),
        Ok(Ok(None)) => {
            tracing::warn!(user_id = %session.user_id, "session for unknown account");
            (IdentityState::Anonymous, None)
        }
        Ok(Err(e)) => {
            tracing::error!(user_id = %session.user_id, error = %e, "identity lookup failed");
            (IdentityState::Anonymous, None)
        }
        Err(_) => {
            tracing::warn!(
                user_id = %session.user_id,
                timeout_ms = config.identity_timeout.as_millis() as u64,
                "identity lookup timed out"
            );
            (IdentityState::Anonymous, None)
        }
    }
}

/// route_gate
///
/// Axum middleware applied to the whole router, fallback included.
/// On allow, the resolved `Account` is attached to the request extensions.
pub async fn route_gate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = decoded_path(request.uri().path());
    let class = classify(&path);
    if matches!(class, RouteClass::Public | RouteClass::Liveness) {
        return next.run(request).await;
    }

    let (identity, account) =
        resolve_identity(state.identity.as_ref(), &state.config, request.headers()).await;

    match authorize(class, &identity) {
        Decision::Allow => {
            tracing::debug!(%path, ?class, "gate allow");
            if let Some(account) = account {
                request.extensions_mut().insert(account);
            }
            next.run(request).await
        }
        decision => {
            let target = decision.redirect_target().unwrap_or(SIGN_IN_ROUTE);
            tracing::info!(
                %path,
                ?class,
                ?identity,
                redirect = target,
                "gate redirect"
            );
            Redirect::to(target).into_response()
        }
    }
}

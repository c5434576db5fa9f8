use crate::{
    AppState,
    auth::{self, AdminUser, SessionUser},
    error::AppError,
    gate::{HOME_ROUTE, SIGN_IN_ROUTE},
    handshake::{self, HandshakeOutcome},
    models::{
        Account, AdminLoginRequest, AdminProfile, AdminSessionResponse, CallbackQuery,
        ErrorResponse, Role, SetRoleRequest, SetRoleResponse, UnknownRole, UserProfile,
    },
};
use axum::{
    Extension, Json,
    extract::{Query, State},
    http::HeaderMap,
    response::Redirect,
};

/// Trims a payload field and treats blank values as missing.
fn required(value: Option<String>, field: &'static str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(AppError::MissingField(field))
}

// --- Handlers ---

/// auth_callback
///
/// [Public Route] Post-authentication landing route running the Role Assignment
/// Handshake. Sign-up sends the new user here with `?role=<intent>`.
///
/// Without a confirmed session nothing is attempted and the caller is sent to
/// sign-in. With one, the role is assigned if absent and the caller always
/// lands on the home route, whatever the outcome.
#[utoipa::path(
    get,
    path = "/auth-callback",
    params(CallbackQuery),
    responses(
        (status = 303, description = "Redirect to / once the session is confirmed, else to /sign-in")
    )
)]
pub async fn auth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let Some(session) = auth::resolve_session(&headers, &state.config) else {
        return Redirect::to(SIGN_IN_ROUTE);
    };

    match handshake::requested_role(query.role.as_deref()) {
        Ok(role) => {
            let outcome = handshake::assign_role_once(
                state.identity.as_ref(),
                &state.in_flight,
                &session.user_id,
                role,
            )
            .await;
            if outcome == HandshakeOutcome::Failed {
                tracing::warn!(user_id = %session.user_id, "handshake failed, continuing to home");
            }
        }
        Err(e) => {
            tracing::warn!(user_id = %session.user_id, error = %e, "ignoring unknown role intent");
        }
    }

    Redirect::to(HOME_ROUTE)
}

/// set_role
///
/// [Authenticated Route] Server-side role assignment for collaborators that
/// cannot call the identity provider directly. Same "set if absent" semantics
/// as the handshake.
///
/// *Validation*: both fields are required and checked before any upstream call.
/// *Authorization*: a session may only assign its own account's role.
/// *Concurrency*: shares the handshake's in-flight guard, so the read and the
/// write cannot interleave with another assignment for the same account.
#[utoipa::path(
    post,
    path = "/api/role",
    request_body = SetRoleRequest,
    responses(
        (status = 200, description = "Role set (or already equal)", body = SetRoleResponse),
        (status = 400, description = "Missing or invalid field", body = ErrorResponse),
        (status = 401, description = "No session", body = ErrorResponse),
        (status = 403, description = "Session does not own the account", body = ErrorResponse),
        (status = 404, description = "Unknown account", body = ErrorResponse),
        (status = 409, description = "A different role is already set, or an assignment is running", body = ErrorResponse),
        (status = 500, description = "Identity provider failure", body = ErrorResponse)
    )
)]
pub async fn set_role(
    SessionUser(session): SessionUser,
    State(state): State<AppState>,
    Json(payload): Json<SetRoleRequest>,
) -> Result<Json<SetRoleResponse>, AppError> {
    let user_id = required(payload.user_id, "userId")?;
    let role: Role = required(payload.role, "role")?
        .parse()
        .map_err(|UnknownRole(raw)| AppError::InvalidRole(raw))?;

    if session.user_id != user_id {
        return Err(AppError::Forbidden);
    }

    let Some(_guard) = state.in_flight.try_acquire(&user_id) else {
        tracing::debug!(user_id = %user_id, "role assignment already running for account");
        return Err(AppError::AssignmentInProgress(user_id));
    };

    let account = state
        .identity
        .get_account(&user_id)
        .await?
        .ok_or_else(|| AppError::AccountNotFound(user_id.clone()))?;

    if account.has_role() {
        if account.role() == Some(role) {
            return Ok(Json(SetRoleResponse {
                success: true,
                user_id,
                role,
            }));
        }
        return Err(AppError::RoleConflict {
            user_id,
            existing: account.public_metadata.role.unwrap_or_default(),
        });
    }

    state.identity.set_public_role(&user_id, role).await?;

    Ok(Json(SetRoleResponse {
        success: true,
        user_id,
        role,
    }))
}

/// get_me
///
/// [Authenticated Route] The session's account and role, as resolved by the gate
/// for this very request.
#[utoipa::path(
    get,
    path = "/api/me",
    responses((status = 200, description = "Profile", body = UserProfile))
)]
pub async fn get_me(Extension(account): Extension<Account>) -> Json<UserProfile> {
    Json(UserProfile {
        role: account.role(),
        id: account.id,
    })
}

/// admin_login
///
/// [Admin Route] Checks operator credentials on the server and issues a signed,
/// short-lived admin session token.
#[utoipa::path(
    post,
    path = "/admin/login",
    request_body = AdminLoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AdminSessionResponse),
        (status = 401, description = "Bad credentials", body = ErrorResponse),
        (status = 503, description = "Admin login not configured", body = ErrorResponse)
    )
)]
pub async fn admin_login(
    State(state): State<AppState>,
    Json(payload): Json<AdminLoginRequest>,
) -> Result<Json<AdminSessionResponse>, AppError> {
    auth::verify_admin_credentials(&state.config, &payload.email, &payload.password)?;
    let (token, expires_at) =
        auth::issue_admin_token(&state.config.admin_email, &state.config.admin_jwt_secret)?;

    tracing::info!(email = %state.config.admin_email, "admin session issued");
    Ok(Json(AdminSessionResponse { token, expires_at }))
}

/// admin_session
///
/// [Admin Route] Verifies an admin session token.
#[utoipa::path(
    get,
    path = "/admin/session",
    responses(
        (status = 200, description = "Valid admin session", body = AdminProfile),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn admin_session(AdminUser { email }: AdminUser) -> Json<AdminProfile> {
    Json(AdminProfile { email })
}

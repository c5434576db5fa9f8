use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{identity::IdentityError, models::ErrorResponse};

/// AppError
///
/// Request-scoped failures of the JSON API. Every variant maps to a status code
/// and renders as an `ErrorResponse` body; none of them terminate the process.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("session may only assign its own role")]
    Forbidden,

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("role already set to {existing} for {user_id}")]
    RoleConflict { user_id: String, existing: String },

    #[error("role assignment already in progress for {0}")]
    AssignmentInProgress(String),

    #[error("admin login is not configured")]
    AdminDisabled,

    #[error("{0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NotFound(user_id) => AppError::AccountNotFound(user_id),
            IdentityError::Upstream { message, .. } => AppError::Upstream(message),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MissingField(_) | AppError::InvalidRole(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::AccountNotFound(_) => StatusCode::NOT_FOUND,
            AppError::RoleConflict { .. } | AppError::AssignmentInProgress(_) => {
                StatusCode::CONFLICT
            }
            AppError::AdminDisabled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use ts_rs::TS;
use utoipa::ToSchema;

// --- Identity Schemas ---

/// Role
///
/// The closed set of marketplace roles stored in an account's public metadata.
/// Scoped routes are granted to exactly one of these.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    /// Assigned by the handshake when sign-up carried no intent signal.
    #[default]
    Customer,
    Merchant,
    Carrier,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Customer, Role::Merchant, Role::Carrier];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Merchant => "merchant",
            Role::Carrier => "carrier",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the known roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid role: {}", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    // Case-sensitive on purpose: stored metadata is always lowercase.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// PublicMetadata
///
/// The metadata bag the identity provider keeps on every account. Only `role`
/// is read or written by this service; everything else is preserved by the
/// provider's merge semantics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PublicMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Account
///
/// An externally managed identity record, keyed by the provider's opaque user id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub public_metadata: PublicMetadata,
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_metadata: PublicMetadata::default(),
        }
    }

    pub fn with_role(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            public_metadata: PublicMetadata {
                role: Some(role.to_string()),
            },
        }
    }

    /// The stored role if it is one of the known roles.
    pub fn role(&self) -> Option<Role> {
        self.public_metadata
            .role
            .as_deref()
            .and_then(|raw| raw.parse().ok())
    }

    /// True once any non-empty role has been written, known or not.
    /// A set role is never overwritten.
    pub fn has_role(&self) -> bool {
        self.public_metadata
            .role
            .as_deref()
            .is_some_and(|raw| !raw.trim().is_empty())
    }
}

// --- Request Payloads (Input Schemas) ---

/// CallbackQuery
///
/// Query string of the post-authentication landing route (GET /auth-callback).
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct CallbackQuery {
    /// Role intent captured at sign-up. Defaults to `customer`.
    pub role: Option<String>,
}

/// SetRoleRequest
///
/// Input payload for the server-side role-set endpoint (POST /api/role).
/// Both fields are optional at the serde layer so a missing field is reported
/// with a descriptive message instead of a generic deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SetRoleRequest {
    #[serde(default)]
    #[schema(example = "user_2abc")]
    pub user_id: Option<String>,
    #[serde(default)]
    #[schema(example = "merchant")]
    pub role: Option<String>,
}

/// AdminLoginRequest
///
/// Credentials for the operator console (POST /admin/login). Checked on the
/// server against a password hash; never stored.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AdminLoginRequest {
    pub email: String,
    pub password: String,
}

// --- Response Schemas (Output) ---

/// SetRoleResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SetRoleResponse {
    pub success: bool,
    pub user_id: String,
    pub role: Role,
}

/// ErrorResponse
///
/// Body of every error returned by the JSON API.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// UserProfile
///
/// The session's account as seen by the SPA (GET /api/me).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserProfile {
    pub id: String,
    pub role: Option<Role>,
}

/// AdminSessionResponse
///
/// A server-issued, verifiable admin session token.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AdminSessionResponse {
    pub token: String,
    /// Unix timestamp (seconds) after which the token is rejected.
    pub expires_at: i64,
}

/// AdminProfile
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AdminProfile {
    pub email: String,
}

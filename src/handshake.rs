//! Role Assignment Handshake.
//!
//! Runs on the post-authentication landing route and gives a freshly signed-up
//! account its role, at most once. A role that is already set is never
//! overwritten, so replaying the callback URL cannot change it.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{
    identity::IdentityService,
    models::{Role, UnknownRole},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The account had no role and now holds this one.
    Assigned(Role),
    /// The account already had a role; nothing was written.
    AlreadySet,
    /// Another handshake for the same account is running in this process.
    InFlight,
    /// Lookup or write failed. Logged and swallowed; the next visit retries.
    Failed,
}

/// InFlight
///
/// Set of user ids with a handshake currently running in this process.
/// Collapses double invocations (e.g. a double render of the landing page)
/// into one write. Other processes are covered by the read-before-write check.
#[derive(Clone, Default)]
pub struct InFlight {
    users: Arc<Mutex<HashSet<String>>>,
}

/// Releases the user id when dropped, including when the request is abandoned.
pub struct InFlightGuard {
    users: Arc<Mutex<HashSet<String>>>,
    user_id: String,
}

impl InFlight {
    pub fn try_acquire(&self, user_id: &str) -> Option<InFlightGuard> {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        if !users.insert(user_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            users: Arc::clone(&self.users),
            user_id: user_id.to_string(),
        })
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(user_id)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.user_id);
    }
}

/// The role asked for by the landing route's `role` query parameter.
/// Absent or empty means `customer`.
pub fn requested_role(param: Option<&str>) -> Result<Role, UnknownRole> {
    match param.map(str::trim) {
        None | Some("") => Ok(Role::default()),
        Some(raw) => raw.parse(),
    }
}

/// assign_role_once
///
/// Reads the account immediately before writing and only writes when no role
/// is set. Never retries and never returns an error: failures are logged and
/// reported as `Failed` so navigation can proceed.
pub async fn assign_role_once(
    identity: &dyn IdentityService,
    in_flight: &InFlight,
    user_id: &str,
    requested: Role,
) -> HandshakeOutcome {
    let Some(_guard) = in_flight.try_acquire(user_id) else {
        tracing::debug!(user_id, "handshake already running for account");
        return HandshakeOutcome::InFlight;
    };

    let account = match identity.get_account(user_id).await {
        Ok(Some(account)) => account,
        Ok(None) => {
            tracing::warn!(user_id, "handshake for unknown account");
            return HandshakeOutcome::Failed;
        }
        Err(e) => {
            tracing::error!(user_id, error = %e, "handshake lookup failed");
            return HandshakeOutcome::Failed;
        }
    };

    if account.has_role() {
        tracing::debug!(user_id, role = ?account.public_metadata.role, "role already set");
        return HandshakeOutcome::AlreadySet;
    }

    match identity.set_public_role(user_id, requested).await {
        Ok(_) => {
            tracing::info!(user_id, role = %requested, "role assigned");
            HandshakeOutcome::Assigned(requested)
        }
        Err(e) => {
            tracing::error!(user_id, role = %requested, error = %e, "role assignment failed");
            HandshakeOutcome::Failed
        }
    }
}

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{Account, PublicMetadata, Role};

/// IdentityError
///
/// Failures talking to the identity provider. All are request-scoped.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("account not found: {0}")]
    NotFound(String),

    #[error("identity service returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("identity service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid identity service url: {0}")]
    InvalidUrl(String),
}

/// IdentityService
///
/// Contract with the external system of record for accounts. The service only
/// ever reads an account and writes the single `role` field of its public
/// metadata; the provider owns everything else.
///
/// `Send + Sync` so the trait object can be shared across Axum's tasks.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Reads an account. `Ok(None)` when the provider does not know the id.
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, IdentityError>;

    /// Merges `role` into the account's public metadata.
    /// Callers are responsible for the "only if absent" check.
    async fn set_public_role(&self, user_id: &str, role: Role) -> Result<Account, IdentityError>;
}

/// IdentityState
///
/// The shared handle stored in `AppState`.
pub type IdentityState = Arc<dyn IdentityService>;

// --- Clerk-compatible HTTP client ---

/// Error envelope returned by the provider's backend API.
#[derive(Deserialize)]
struct ProviderErrors {
    #[serde(default)]
    errors: Vec<ProviderError>,
}

#[derive(Deserialize)]
struct ProviderError {
    message: String,
    #[serde(default)]
    long_message: Option<String>,
}

/// HttpIdentityClient
///
/// Talks to a Clerk-compatible backend API:
/// - `GET  {base}/users/{id}`
/// - `PATCH {base}/users/{id}/metadata` with `{"public_metadata": {"role": ..}}`
///
/// Every call carries the service secret key as a bearer credential.
#[derive(Clone)]
pub struct HttpIdentityClient {
    client: reqwest::Client,
    base_url: Url,
    secret_key: String,
}

impl HttpIdentityClient {
    pub fn new(
        base_url: &str,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, IdentityError> {
        let base_url =
            Url::parse(base_url).map_err(|e| IdentityError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(IdentityError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            secret_key: secret_key.into(),
        })
    }

    /// Builds `{base}/users/{id}[/suffix]`, percent-encoding the opaque id.
    fn user_url(&self, user_id: &str, suffix: Option<&str>) -> Result<Url, IdentityError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| IdentityError::InvalidUrl(self.base_url.to_string()))?;
            segments.pop_if_empty().push("users").push(user_id);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    /// Turns a non-success response into an `IdentityError`, keeping the
    /// provider's own message when it sent one.
    async fn upstream_error(user_id: &str, response: reqwest::Response) -> IdentityError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return IdentityError::NotFound(user_id.to_string());
        }

        let message = match response.json::<ProviderErrors>().await {
            Ok(body) => body
                .errors
                .into_iter()
                .next()
                .map(|e| e.long_message.unwrap_or(e.message)),
            Err(_) => None,
        }
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });

        IdentityError::Upstream {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl IdentityService for HttpIdentityClient {
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, IdentityError> {
        let url = self.user_url(user_id, None)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(Some(response.json::<Account>().await?));
        }

        match Self::upstream_error(user_id, response).await {
            IdentityError::NotFound(_) => Ok(None),
            err => Err(err),
        }
    }

    async fn set_public_role(&self, user_id: &str, role: Role) -> Result<Account, IdentityError> {
        let url = self.user_url(user_id, Some("metadata"))?;
        let response = self
            .client
            .patch(url)
            .bearer_auth(&self.secret_key)
            .json(&serde_json::json!({ "public_metadata": { "role": role } }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::upstream_error(user_id, response).await);
        }

        tracing::info!(user_id, %role, "public role written to identity provider");
        Ok(response.json::<Account>().await?)
    }
}

// --- In-memory implementation ---

/// InMemoryIdentityService
///
/// Process-local account store used for local development and tests. It counts
/// every read and write it receives, so callers can assert on the number of
/// identity round trips, and can be switched into a failing mode to simulate
/// a provider outage.
#[derive(Default)]
pub struct InMemoryIdentityService {
    accounts: RwLock<HashMap<String, Account>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    failing: AtomicBool,
    latency: Option<Duration>,
}

impl InMemoryIdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|account| (account.id.clone(), account))
            .collect();
        Self {
            accounts: RwLock::new(accounts),
            ..Self::default()
        }
    }

    /// Builds a store from a comma-separated `id[:role]` list, e.g.
    /// `user_a:merchant,user_b`. Blank entries are skipped; the role string is
    /// stored as given.
    pub fn from_seed(seed: &str) -> Self {
        Self::with_accounts(
            seed.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(|entry| match entry.split_once(':') {
                    Some((id, role)) => Account {
                        id: id.trim().to_string(),
                        public_metadata: PublicMetadata {
                            role: Some(role.trim().to_string()).filter(|r| !r.is_empty()),
                        },
                    },
                    None => Account::new(entry),
                }),
        )
    }

    /// Delays every call, used to exercise lookup timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn insert(&self, account: Account) {
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), account);
    }

    /// Direct view of the store, bypassing the call counters.
    pub async fn account(&self, user_id: &str) -> Option<Account> {
        self.accounts.read().await.get(user_id).cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn simulate_call(&self) -> Result<(), IdentityError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(IdentityError::Upstream {
                status: 503,
                message: "identity service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityService for InMemoryIdentityService {
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, IdentityError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.simulate_call().await?;
        Ok(self.account(user_id).await)
    }

    async fn set_public_role(&self, user_id: &str, role: Role) -> Result<Account, IdentityError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.simulate_call().await?;

        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(user_id)
            .ok_or_else(|| IdentityError::NotFound(user_id.to_string()))?;
        account.public_metadata.role = Some(role.to_string());
        Ok(account.clone())
    }
}

//! Eventing credential vault and managed-account provisioning.
//!
//! Versions that declare eventing need a per-tenant credential before
//! their deploy request can be built. The vault caches credentials by
//! account name; on a miss the account provisioner mints one via the
//! platform's managed-account API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::SecretString;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::PlatformConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::EventingCredential;

/// Storage for eventing credentials, keyed by managed-account name.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Fetch a credential, if one is stored.
    async fn get(&self, name: &str) -> ControlResult<Option<EventingCredential>>;

    /// Store a credential, replacing any existing one under the same name.
    async fn store(&self, credential: EventingCredential) -> ControlResult<()>;
}

/// Mints per-tenant eventing credentials.
#[async_trait]
pub trait AccountProvisioner: Send + Sync {
    /// Create the named managed account, or replace its credential if the
    /// account already exists. Idempotent on the platform side.
    async fn create_or_replace_account(&self, name: &str) -> ControlResult<EventingCredential>;
}

/// In-memory vault.
///
/// Credentials are transient by design: losing them on restart only means
/// the next deploy re-provisions the account.
#[derive(Default)]
pub struct MemoryVault {
    credentials: RwLock<HashMap<String, EventingCredential>>,
}

impl MemoryVault {
    /// Create an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialVault for MemoryVault {
    async fn get(&self, name: &str) -> ControlResult<Option<EventingCredential>> {
        let credentials = self.credentials.read().await;
        Ok(credentials.get(name).cloned())
    }

    async fn store(&self, credential: EventingCredential) -> ControlResult<()> {
        let mut credentials = self.credentials.write().await;
        credentials.insert(credential.name.clone(), credential);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryVault").finish_non_exhaustive()
    }
}

/// Credential as returned by the managed-account API.
#[derive(Deserialize)]
struct RawCredential {
    client_id: String,
    client_secret: String,
}

/// HTTP implementation of [`AccountProvisioner`].
#[derive(Debug, Clone)]
pub struct HttpAccountProvisioner {
    client: Client,
    base_url: String,
}

impl HttpAccountProvisioner {
    /// Create a new provisioner client from configuration.
    pub fn new(config: &PlatformConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.accounts_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl AccountProvisioner for HttpAccountProvisioner {
    async fn create_or_replace_account(&self, name: &str) -> ControlResult<EventingCredential> {
        let url = format!("{}/accounts/{name}", self.base_url);

        let response = self
            .client
            .put(&url)
            .send()
            .await
            .map_err(|e| ControlError::provisioning(format!("account request failed: {e}")))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let raw: RawCredential = response.json().await.map_err(|e| {
                    ControlError::provisioning(format!("invalid account response: {e}"))
                })?;

                Ok(EventingCredential {
                    name: name.to_owned(),
                    client_id: raw.client_id,
                    client_secret: SecretString::from(raw.client_secret),
                })
            }
            status => Err(ControlError::provisioning(format!(
                "account creation rejected: {status}"
            ))),
        }
    }
}

/// Provisioner double for tests.
#[cfg(test)]
pub struct MockAccountProvisioner {
    /// Account names requested, in order.
    pub requests: std::sync::Mutex<Vec<String>>,
    /// When set, every call fails with a provisioning error.
    pub fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MockAccountProvisioner {
    pub fn new() -> Self {
        Self {
            requests: std::sync::Mutex::new(Vec::new()),
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl AccountProvisioner for MockAccountProvisioner {
    async fn create_or_replace_account(&self, name: &str) -> ControlResult<EventingCredential> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ControlError::provisioning("simulated provisioning outage"));
        }
        self.requests.lock().unwrap().push(name.to_owned());
        Ok(EventingCredential {
            name: name.to_owned(),
            client_id: format!("{name}-client"),
            client_secret: SecretString::from("mock-secret".to_owned()),
        })
    }
}

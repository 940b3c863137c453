//! HTTP client for the remote platform's deployment API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::config::PlatformConfig;
use crate::error::{ControlError, ControlResult};
use crate::fleet::FleetTarget;
use crate::types::{ArtifactRef, DecisionId, EventingConfig, TenantId};

/// A deploy request for one decision version.
///
/// Completion is reported asynchronously: the platform calls back on
/// `callback_url` once the version is running (or has failed).
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Decision id.
    pub decision_id: DecisionId,
    /// Decision name.
    pub decision_name: String,
    /// Version number being deployed.
    pub version: u64,
    /// Stored artifact to deploy.
    pub artifact: ArtifactRef,
    /// Selected fleet target.
    pub target: FleetTarget,
    /// URL the platform calls back on completion.
    pub callback_url: String,
    /// Eventing configuration with an attached credential, if declared.
    pub eventing: Option<EventingConfig>,
}

/// Seam to the platform's deployment API.
#[async_trait]
pub trait DeployClient: Send + Sync {
    /// Request deployment of a version. Acceptance means the request was
    /// dispatched, not that the version is running.
    async fn deploy(&self, request: &DeployRequest) -> ControlResult<()>;

    /// Tear down one version's remote resources.
    async fn delete_version(
        &self,
        target: &FleetTarget,
        decision_id: &DecisionId,
        version: u64,
    ) -> ControlResult<()>;

    /// Tear down all remote resources for a decision.
    async fn delete_decision(
        &self,
        target: &FleetTarget,
        decision_id: &DecisionId,
    ) -> ControlResult<()>;
}

/// Wire form of a deploy request.
#[derive(Serialize)]
struct DeployBody<'a> {
    tenant: &'a str,
    decision_id: &'a str,
    decision_name: &'a str,
    version: u64,
    artifact_url: &'a str,
    content_hash: &'a str,
    fleet: &'a str,
    callback_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    eventing: Option<EventingBody<'a>>,
}

/// Wire form of the eventing block. The credential secret is exposed here
/// and nowhere else; this struct never outlives the request.
#[derive(Serialize)]
struct EventingBody<'a> {
    inbound_topic: &'a str,
    outbound_topic: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

/// HTTP implementation of [`DeployClient`].
#[derive(Debug, Clone)]
pub struct HttpDeployClient {
    client: Client,
    base_url: String,
}

impl HttpDeployClient {
    /// Create a new deploy client from configuration.
    pub fn new(config: &PlatformConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Create a new deploy client with a custom base URL.
    pub fn with_url(url: impl Into<String>) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl DeployClient for HttpDeployClient {
    async fn deploy(&self, request: &DeployRequest) -> ControlResult<()> {
        let url = format!(
            "{}/namespaces/{}/decisions",
            self.base_url, request.target.namespace
        );

        let eventing = request.eventing.as_ref().and_then(|config| {
            config.credential.as_ref().map(|credential| EventingBody {
                inbound_topic: &config.inbound_topic,
                outbound_topic: &config.outbound_topic,
                client_id: &credential.client_id,
                client_secret: credential.client_secret.expose_secret(),
            })
        });

        let body = DeployBody {
            tenant: request.tenant.as_str(),
            decision_id: request.decision_id.as_str(),
            decision_name: &request.decision_name,
            version: request.version,
            artifact_url: &request.artifact.provider_url,
            content_hash: &request.artifact.content_hash,
            fleet: &request.target.name,
            callback_url: &request.callback_url,
            eventing,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK | StatusCode::CREATED => Ok(()),
            status => Err(ControlError::platform(format!(
                "deploy request rejected: {status}"
            ))),
        }
    }

    async fn delete_version(
        &self,
        target: &FleetTarget,
        decision_id: &DecisionId,
        version: u64,
    ) -> ControlResult<()> {
        let url = format!(
            "{}/namespaces/{}/decisions/{}/versions/{version}",
            self.base_url, target.namespace, decision_id
        );

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            status => Err(ControlError::platform(format!(
                "failed to delete version: {status}"
            ))),
        }
    }

    async fn delete_decision(
        &self,
        target: &FleetTarget,
        decision_id: &DecisionId,
    ) -> ControlResult<()> {
        let url = format!(
            "{}/namespaces/{}/decisions/{}",
            self.base_url, target.namespace, decision_id
        );

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            status => Err(ControlError::platform(format!(
                "failed to delete decision: {status}"
            ))),
        }
    }
}

/// Recording deploy client for tests.
#[cfg(test)]
pub struct MockDeployClient {
    /// Deploy requests received, in order.
    pub deploys: std::sync::Mutex<Vec<DeployRequest>>,
    /// Version deletions received as (decision id, version).
    pub deleted_versions: std::sync::Mutex<Vec<(DecisionId, u64)>>,
    /// Decision deletions received.
    pub deleted_decisions: std::sync::Mutex<Vec<DecisionId>>,
    /// When set, every call fails with a platform error.
    pub fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MockDeployClient {
    pub fn new() -> Self {
        Self {
            deploys: std::sync::Mutex::new(Vec::new()),
            deleted_versions: std::sync::Mutex::new(Vec::new()),
            deleted_decisions: std::sync::Mutex::new(Vec::new()),
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn deploy_count(&self) -> usize {
        self.deploys.lock().unwrap().len()
    }

    fn check_fail(&self) -> ControlResult<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ControlError::platform("simulated platform outage"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl DeployClient for MockDeployClient {
    async fn deploy(&self, request: &DeployRequest) -> ControlResult<()> {
        self.check_fail()?;
        self.deploys.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn delete_version(
        &self,
        _target: &FleetTarget,
        decision_id: &DecisionId,
        version: u64,
    ) -> ControlResult<()> {
        self.check_fail()?;
        self.deleted_versions
            .lock()
            .unwrap()
            .push((decision_id.clone(), version));
        Ok(())
    }

    async fn delete_decision(
        &self,
        _target: &FleetTarget,
        decision_id: &DecisionId,
    ) -> ControlResult<()> {
        self.check_fail()?;
        self.deleted_decisions.lock().unwrap().push(decision_id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let config = PlatformConfig::default();
        assert!(HttpDeployClient::new(&config).is_ok());
        assert!(HttpDeployClient::with_url("http://localhost:9090").is_ok());
    }

    #[test]
    fn deploy_body_carries_exposed_secret() {
        use crate::types::EventingCredential;
        use secrecy::SecretString;

        let credential = EventingCredential {
            name: "decision-eventing-acme".to_owned(),
            client_id: "client-1".to_owned(),
            client_secret: SecretString::from("s3cret".to_owned()),
        };

        let body = DeployBody {
            tenant: "acme",
            decision_id: "dec-1",
            decision_name: "approval",
            version: 1,
            artifact_url: "memory://artifacts/acme/dec-1/1/decision.json",
            content_hash: "abc123",
            fleet: "default",
            callback_url: "http://localhost:8084/callback/decisions/dec-1/versions/1",
            eventing: Some(EventingBody {
                inbound_topic: "in",
                outbound_topic: "out",
                client_id: &credential.client_id,
                client_secret: credential.client_secret.expose_secret(),
            }),
        };

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("s3cret"));
        assert!(json.contains("callback_url"));
    }
}

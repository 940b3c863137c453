//! Deployment orchestration.
//!
//! Sequences lifecycle commits with remote platform calls. The ordering
//! rule is fixed: the version commit always lands before the remote call,
//! and the commit is never held open across it. A deploy request that
//! fails outright is compensated with a FAILED transition before the
//! error surfaces, so the in-flight marker never leaks.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::clients::{AccountProvisioner, CredentialVault, DeployClient, DeployRequest};
use crate::error::{ControlError, ControlResult};
use crate::events::{EventBus, EventKind, LifecycleEvent};
use crate::fleet::FleetSelector;
use crate::lifecycle::{CreateVersionRequest, LifecycleManager};
use crate::types::{Decision, DecisionId, Deployment, EventingConfig, TenantId};

/// Orchestrates lifecycle transitions against the remote platform.
pub struct DeploymentOrchestrator {
    lifecycle: Arc<LifecycleManager>,
    deploy: Arc<dyn DeployClient>,
    fleet: Arc<dyn FleetSelector>,
    vault: Arc<dyn CredentialVault>,
    accounts: Arc<dyn AccountProvisioner>,
    events: Arc<EventBus>,
    api_base: String,
}

impl DeploymentOrchestrator {
    /// Create a new orchestrator.
    #[must_use]
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        deploy: Arc<dyn DeployClient>,
        fleet: Arc<dyn FleetSelector>,
        vault: Arc<dyn CredentialVault>,
        accounts: Arc<dyn AccountProvisioner>,
        events: Arc<EventBus>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            lifecycle,
            deploy,
            fleet,
            vault,
            accounts,
            events,
            api_base: api_base.into().trim_end_matches('/').to_owned(),
        }
    }

    /// The lifecycle manager, for read-side queries.
    #[must_use]
    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Submit a new version and dispatch its deployment.
    pub async fn create_or_update(
        &self,
        tenant: &TenantId,
        request: CreateVersionRequest,
    ) -> ControlResult<Decision> {
        let event_tenant = tenant.clone();
        let event_name = request.name.clone();
        self.events.notify(move || {
            LifecycleEvent::new(EventKind::BeforeCreateOrUpdate {
                tenant: event_tenant,
                decision_name: event_name,
            })
        });

        let decision = self
            .lifecycle
            .create_or_update_version(tenant, request)
            .await?;

        let version = decision.next_version.ok_or_else(|| {
            ControlError::internal("created version has no in-flight marker")
        })?;

        self.request_deployment(&decision, version).await?;

        Ok(decision)
    }

    /// Promote a READY version and dispatch its deployment.
    pub async fn promote(
        &self,
        tenant: &TenantId,
        lookup: &str,
        version: u64,
    ) -> ControlResult<Decision> {
        let decision = self.lifecycle.promote(tenant, lookup, version).await?;
        self.request_deployment(&decision, version).await?;
        Ok(decision)
    }

    /// Dispatch the deploy request for an already committed BUILDING
    /// version.
    ///
    /// When the version declares eventing, the tenant credential is
    /// resolved first; a provisioning failure surfaces before any deploy
    /// call is issued, leaving the version BUILDING. A failure of the
    /// deploy request itself is compensated via a FAILED transition and
    /// surfaced as [`ControlError::DeploymentDispatch`].
    pub async fn request_deployment(
        &self,
        decision: &Decision,
        version: u64,
    ) -> ControlResult<()> {
        let record = decision.version(version).ok_or_else(|| {
            ControlError::VersionNotFound {
                decision: decision.name.clone(),
                version,
            }
        })?;

        let eventing = match &record.eventing {
            Some(config) => Some(self.attach_credential(&decision.tenant, config).await?),
            None => None,
        };

        let artifact = record.artifact.clone().ok_or_else(|| {
            ControlError::internal("building version has no artifact")
        })?;

        let target = self.fleet.select_target(decision)?;
        let callback_url = format!(
            "{}/callback/decisions/{}/versions/{version}",
            self.api_base, decision.id
        );

        let request = DeployRequest {
            tenant: decision.tenant.clone(),
            decision_id: decision.id.clone(),
            decision_name: decision.name.clone(),
            version,
            artifact,
            target,
            callback_url,
            eventing,
        };

        if let Err(dispatch_error) = self.deploy.deploy(&request).await {
            warn!(
                tenant = %decision.tenant,
                decision = %decision.name,
                version,
                error = %dispatch_error,
                "deploy request failed, compensating"
            );
            return Err(self.compensate_dispatch(decision, version, dispatch_error).await);
        }

        info!(
            tenant = %decision.tenant,
            decision = %decision.name,
            version,
            "deploy request dispatched"
        );

        Ok(())
    }

    /// Mark the version FAILED after a failed deploy request and build the
    /// dispatch error for the caller.
    async fn compensate_dispatch(
        &self,
        decision: &Decision,
        version: u64,
        dispatch_error: ControlError,
    ) -> ControlError {
        let message = dispatch_error.to_string();
        let deployment = Deployment::dispatch_failure(&message);

        match self.lifecycle.failed(&decision.id, version, deployment).await {
            Ok(updated) => self.publish_failed(&updated, version),
            Err(e) => {
                // The dispatch error still surfaces; the aggregate keeps
                // its in-flight marker for the operator to resolve.
                error!(
                    tenant = %decision.tenant,
                    decision = %decision.name,
                    version,
                    error = %e,
                    "compensating failed transition did not commit"
                );
            }
        }

        ControlError::DeploymentDispatch {
            tenant: decision.tenant.to_string(),
            decision: decision.name.clone(),
            version,
            source_message: message,
        }
    }

    /// Resolve the tenant's eventing credential and attach it transiently.
    ///
    /// The credential is cached in the vault under a name derived from the
    /// tenant; on a miss the managed-account provisioner mints one.
    async fn attach_credential(
        &self,
        tenant: &TenantId,
        config: &EventingConfig,
    ) -> ControlResult<EventingConfig> {
        let name = format!("decision-eventing-{tenant}");

        let credential = match self.vault.get(&name).await? {
            Some(credential) => credential,
            None => {
                info!(tenant = %tenant, account = %name, "provisioning eventing account");
                let credential = self.accounts.create_or_replace_account(&name).await?;
                self.vault.store(credential.clone()).await?;
                credential
            }
        };

        let mut config = config.clone();
        config.credential = Some(credential);
        Ok(config)
    }

    /// Apply a successful completion callback.
    pub async fn handle_deployed(
        &self,
        id: &DecisionId,
        version: u64,
        deployment: Deployment,
    ) -> ControlResult<Decision> {
        let decision = self.lifecycle.deployed(id, version, deployment).await?;
        self.publish_deployed(&decision, version);
        Ok(decision)
    }

    /// Apply a failure completion callback.
    pub async fn handle_failed(
        &self,
        id: &DecisionId,
        version: u64,
        deployment: Deployment,
    ) -> ControlResult<Decision> {
        let decision = self.lifecycle.failed(id, version, deployment).await?;
        self.publish_failed(&decision, version);
        Ok(decision)
    }

    /// Logically delete a version, then best-effort tear down its remote
    /// resources. Remote failures are logged only.
    pub async fn delete_version(
        &self,
        tenant: &TenantId,
        lookup: &str,
        version: u64,
    ) -> ControlResult<Decision> {
        let decision = self.lifecycle.delete_version(tenant, lookup, version).await?;

        match self.fleet.select_target(&decision) {
            Ok(target) => {
                if let Err(e) = self.deploy.delete_version(&target, &decision.id, version).await {
                    warn!(
                        tenant = %tenant,
                        decision = %decision.name,
                        version,
                        error = %e,
                        "remote version delete failed"
                    );
                }
            }
            Err(e) => warn!(decision = %decision.name, error = %e, "no fleet target for cleanup"),
        }

        Ok(decision)
    }

    /// Hard-delete a decision, then best-effort tear down remote resources
    /// and stored artifacts. Cleanup failures are logged only.
    pub async fn delete_decision(&self, tenant: &TenantId, lookup: &str) -> ControlResult<Decision> {
        let decision = self.lifecycle.delete_decision(tenant, lookup).await?;

        match self.fleet.select_target(&decision) {
            Ok(target) => {
                if let Err(e) = self.deploy.delete_decision(&target, &decision.id).await {
                    warn!(
                        tenant = %tenant,
                        decision = %decision.name,
                        error = %e,
                        "remote decision delete failed"
                    );
                }
            }
            Err(e) => warn!(decision = %decision.name, error = %e, "no fleet target for cleanup"),
        }

        self.lifecycle
            .artifacts()
            .delete_decision(tenant, &decision.id)
            .await;

        Ok(decision)
    }

    fn publish_deployed(&self, decision: &Decision, version: u64) {
        let tenant = decision.tenant.clone();
        let decision_id = decision.id.clone();
        let decision_name = decision.name.clone();
        let deployment = decision.version(version).and_then(|v| v.deployment.clone());

        self.events.notify(move || {
            LifecycleEvent::new(EventKind::AfterDeployed {
                tenant,
                decision_id,
                decision_name,
                version,
                deployment,
            })
        });
    }

    fn publish_failed(&self, decision: &Decision, version: u64) {
        let tenant = decision.tenant.clone();
        let decision_id = decision.id.clone();
        let decision_name = decision.name.clone();
        let deployment = decision.version(version).and_then(|v| v.deployment.clone());

        self.events.notify(move || {
            LifecycleEvent::new(EventKind::AfterFailed {
                tenant,
                decision_id,
                decision_name,
                version,
                deployment,
            })
        });
    }
}

impl std::fmt::Debug for DeploymentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentOrchestrator")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

//! Decision version lifecycle state machine.
//!
//! Every operation is a read-modify-write over the decision aggregate,
//! committed through the store's revision compare-and-swap. The single
//! in-flight invariant holds throughout: `next_version` is set iff an
//! operation is in flight, and that version is always BUILDING.
//!
//! This module is pure state-transition logic plus the artifact write.
//! Remote platform calls and event publication sit one layer up, in the
//! orchestrator.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::artifacts::ArtifactStorage;
use crate::error::{ControlError, ControlResult};
use crate::store::{DecisionStore, Page};
use crate::types::{
    Decision, DecisionId, DecisionVersion, Deployment, EventingConfig, TenantId, VersionStatus,
};

/// A submitted decision definition.
#[derive(Debug, Clone)]
pub struct CreateVersionRequest {
    /// Decision name, unique per tenant.
    pub name: String,
    /// The decision definition to store as the version's artifact.
    pub definition: serde_json::Value,
    /// Eventing configuration, if the version declares eventing.
    pub eventing: Option<EventingConfig>,
}

/// State-transition logic over the decision aggregate.
pub struct LifecycleManager {
    store: Arc<dyn DecisionStore>,
    artifacts: Arc<ArtifactStorage>,
}

impl LifecycleManager {
    /// Create a new lifecycle manager.
    #[must_use]
    pub fn new(store: Arc<dyn DecisionStore>, artifacts: Arc<ArtifactStorage>) -> Self {
        Self { store, artifacts }
    }

    /// Submit a new version of a decision, creating the decision on first
    /// submission.
    ///
    /// The artifact is written before the aggregate is committed; an
    /// artifact failure therefore leaves no version behind. Rejects with
    /// [`ControlError::OperationInFlight`] while another version is
    /// building.
    pub async fn create_or_update_version(
        &self,
        tenant: &TenantId,
        request: CreateVersionRequest,
    ) -> ControlResult<Decision> {
        match self
            .store
            .find_by_tenant_and_name(tenant, &request.name)
            .await?
        {
            None => self.create_decision(tenant, request).await,
            Some(decision) => self.add_version(decision, request).await,
        }
    }

    async fn create_decision(
        &self,
        tenant: &TenantId,
        request: CreateVersionRequest,
    ) -> ControlResult<Decision> {
        let mut decision = Decision::new(tenant.clone(), &request.name);

        let artifact = self
            .artifacts
            .write(tenant, &decision.id, 1, &request.definition)
            .await?;

        let mut version = DecisionVersion::new(decision.id.clone(), 1, request.eventing);
        version.artifact = Some(artifact);
        decision.versions.push(version);
        decision.current_version = Some(1);
        decision.next_version = Some(1);

        // The unique (tenant, name) constraint breaks the tie between two
        // concurrent first-time creates: the second inserter conflicts.
        self.store.insert(&decision).await?;

        info!(
            tenant = %tenant,
            decision = %decision.name,
            id = %decision.id,
            "decision created with version 1 building"
        );

        Ok(decision)
    }

    async fn add_version(
        &self,
        mut decision: Decision,
        request: CreateVersionRequest,
    ) -> ControlResult<Decision> {
        if let Some(building) = decision.next_version {
            return Err(ControlError::OperationInFlight {
                decision: decision.name,
                version: building,
            });
        }

        let number = decision.max_version() + 1;

        let artifact = self
            .artifacts
            .write(&decision.tenant, &decision.id, number, &request.definition)
            .await?;

        let mut version = DecisionVersion::new(decision.id.clone(), number, request.eventing);
        version.artifact = Some(artifact);
        decision.versions.push(version);
        decision.next_version = Some(number);

        self.store.update(&decision).await?;

        info!(
            tenant = %decision.tenant,
            decision = %decision.name,
            version = number,
            "version building"
        );

        Ok(decision)
    }

    /// Promote a READY version: flip it back to BUILDING and mark it as the
    /// in-flight version. Rollback reuses the same deploy path as creation.
    pub async fn promote(
        &self,
        tenant: &TenantId,
        lookup: &str,
        version: u64,
    ) -> ControlResult<Decision> {
        let mut decision = self.get(tenant, lookup).await?;

        if let Some(building) = decision.next_version {
            return Err(ControlError::OperationInFlight {
                decision: decision.name,
                version: building,
            });
        }

        let target = decision.version_mut(version).ok_or_else(|| {
            ControlError::VersionNotFound {
                decision: lookup.to_owned(),
                version,
            }
        })?;

        if target.status != VersionStatus::Ready {
            return Err(ControlError::InvalidTransition {
                from: target.status.as_str(),
                to: VersionStatus::Building.as_str(),
            });
        }

        target.status = VersionStatus::Building;
        decision.next_version = Some(version);

        self.store.update(&decision).await?;

        info!(
            tenant = %decision.tenant,
            decision = %decision.name,
            version,
            "version promoted to building"
        );

        Ok(decision)
    }

    /// Record a successful deployment completion.
    ///
    /// The callback must name the in-flight version; anything else is a
    /// stale or duplicate callback and is rejected. The version becomes
    /// CURRENT, a differing prior current is demoted to READY, and the
    /// in-flight marker clears.
    pub async fn deployed(
        &self,
        id: &DecisionId,
        version: u64,
        deployment: Deployment,
    ) -> ControlResult<Decision> {
        let mut decision = self.get_by_id(id).await?;
        Self::check_in_flight(&decision, version)?;

        let prior_current = decision.current_version;

        if let Some(prior) = prior_current.filter(|&p| p != version) {
            if let Some(previous) = decision.version_mut(prior) {
                if previous.status == VersionStatus::Current {
                    previous.status = VersionStatus::Ready;
                }
            }
        }

        let target = decision.version_mut(version).ok_or_else(|| {
            ControlError::VersionNotFound {
                decision: id.to_string(),
                version,
            }
        })?;
        target.status = VersionStatus::Current;
        target.published_at = Some(Utc::now());
        target.deployment = Some(deployment);

        decision.current_version = Some(version);
        decision.next_version = None;

        self.store.update(&decision).await?;

        info!(
            tenant = %decision.tenant,
            decision = %decision.name,
            version,
            "version deployed and current"
        );

        Ok(decision)
    }

    /// Record a deployment failure, from either a failure callback or a
    /// compensating transition after a failed deploy request.
    ///
    /// Clears the in-flight marker. When the prior current version has
    /// itself already failed, the current pointer is reassigned to this
    /// newest failure so readers see the freshest one.
    pub async fn failed(
        &self,
        id: &DecisionId,
        version: u64,
        deployment: Deployment,
    ) -> ControlResult<Decision> {
        let mut decision = self.get_by_id(id).await?;
        Self::check_in_flight(&decision, version)?;

        let target = decision.version_mut(version).ok_or_else(|| {
            ControlError::VersionNotFound {
                decision: id.to_string(),
                version,
            }
        })?;
        target.status = VersionStatus::Failed;
        target.deployment = Some(deployment);

        let current_failed = decision
            .current()
            .is_some_and(|c| c.status == VersionStatus::Failed);
        if current_failed && decision.current_version != Some(version) {
            decision.current_version = Some(version);
        }

        decision.next_version = None;

        self.store.update(&decision).await?;

        info!(
            tenant = %decision.tenant,
            decision = %decision.name,
            version,
            "version failed"
        );

        Ok(decision)
    }

    /// Logically delete a version. CURRENT and BUILDING versions cannot be
    /// deleted; deleted versions stay listable in history.
    pub async fn delete_version(
        &self,
        tenant: &TenantId,
        lookup: &str,
        version: u64,
    ) -> ControlResult<Decision> {
        let mut decision = self.get(tenant, lookup).await?;

        let target = decision.version_mut(version).ok_or_else(|| {
            ControlError::VersionNotFound {
                decision: lookup.to_owned(),
                version,
            }
        })?;

        match target.status {
            VersionStatus::Current | VersionStatus::Building | VersionStatus::Deleted => {
                return Err(ControlError::InvalidTransition {
                    from: target.status.as_str(),
                    to: VersionStatus::Deleted.as_str(),
                });
            }
            VersionStatus::Ready | VersionStatus::Failed => {
                target.status = VersionStatus::Deleted;
            }
        }

        self.store.update(&decision).await?;

        info!(
            tenant = %decision.tenant,
            decision = %decision.name,
            version,
            "version deleted"
        );

        Ok(decision)
    }

    /// Hard-delete a decision and all its versions. Returns the deleted
    /// aggregate so the caller can clean up remote and artifact state.
    pub async fn delete_decision(&self, tenant: &TenantId, lookup: &str) -> ControlResult<Decision> {
        let decision = self.get(tenant, lookup).await?;

        self.store.delete(tenant, &decision.id).await?;

        info!(
            tenant = %decision.tenant,
            decision = %decision.name,
            id = %decision.id,
            "decision deleted"
        );

        Ok(decision)
    }

    /// The artifact storage backing this manager.
    #[must_use]
    pub fn artifacts(&self) -> &Arc<ArtifactStorage> {
        &self.artifacts
    }

    /// Look up a decision by id or name within a tenant.
    pub async fn get(&self, tenant: &TenantId, lookup: &str) -> ControlResult<Decision> {
        self.store
            .find_by_tenant_and_ref(tenant, lookup)
            .await?
            .ok_or_else(|| ControlError::DecisionNotFound(lookup.to_owned()))
    }

    /// Look up a decision by id, across tenants. Callback path only.
    pub async fn get_by_id(&self, id: &DecisionId) -> ControlResult<Decision> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ControlError::DecisionNotFound(id.to_string()))
    }

    /// List a tenant's decisions with a current version, paged.
    pub async fn list_current(&self, tenant: &TenantId, page: Page) -> ControlResult<Vec<Decision>> {
        self.store.find_current_by_tenant(tenant, page).await
    }

    /// List a tenant's decisions with a version building.
    pub async fn list_building(&self, tenant: &TenantId) -> ControlResult<Vec<Decision>> {
        self.store.find_building_by_tenant(tenant).await
    }

    fn check_in_flight(decision: &Decision, version: u64) -> ControlResult<()> {
        if decision.next_version != Some(version) {
            return Err(ControlError::VersionMismatch {
                expected: decision.next_version,
                received: version,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager() -> LifecycleManager {
        LifecycleManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ArtifactStorage::in_memory()),
        )
    }

    fn request(name: &str) -> CreateVersionRequest {
        CreateVersionRequest {
            name: name.to_owned(),
            definition: serde_json::json!({"rules": []}),
            eventing: None,
        }
    }

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    #[tokio::test]
    async fn first_create_sets_both_pointers() {
        let manager = manager();
        let decision = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();

        assert_eq!(decision.current_version, Some(1));
        assert_eq!(decision.next_version, Some(1));
        assert_eq!(decision.version(1).unwrap().status, VersionStatus::Building);
        assert!(decision.version(1).unwrap().artifact.is_some());
    }

    #[tokio::test]
    async fn second_create_while_building_is_rejected() {
        let manager = manager();
        manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();

        let result = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await;

        assert!(matches!(
            result,
            Err(ControlError::OperationInFlight { version: 1, .. })
        ));
    }

    #[tokio::test]
    async fn version_numbers_strictly_increase() {
        let manager = manager();
        let decision = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();
        manager
            .deployed(&decision.id, 1, Deployment::default())
            .await
            .unwrap();

        let decision = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();

        assert_eq!(decision.next_version, Some(2));
        assert_eq!(decision.current_version, Some(1));
        assert_eq!(decision.version(2).unwrap().status, VersionStatus::Building);
    }

    #[tokio::test]
    async fn deployed_demotes_prior_current_to_ready() {
        let manager = manager();
        let decision = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();
        let id = decision.id.clone();

        manager.deployed(&id, 1, Deployment::default()).await.unwrap();
        manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();
        let decision = manager.deployed(&id, 2, Deployment::default()).await.unwrap();

        assert_eq!(decision.current_version, Some(2));
        assert!(decision.next_version.is_none());
        assert_eq!(decision.version(1).unwrap().status, VersionStatus::Ready);
        assert_eq!(decision.version(2).unwrap().status, VersionStatus::Current);
        assert!(decision.version(2).unwrap().published_at.is_some());
    }

    #[tokio::test]
    async fn promote_rolls_back_to_ready_version() {
        // Property: [1:READY, 2:CURRENT], promote(1) -> next=1 BUILDING,
        // deployed(1) -> current=1, version 2 READY.
        let manager = manager();
        let decision = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();
        let id = decision.id.clone();
        manager.deployed(&id, 1, Deployment::default()).await.unwrap();
        manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();
        manager.deployed(&id, 2, Deployment::default()).await.unwrap();

        let decision = manager.promote(&tenant(), "approval", 1).await.unwrap();
        assert_eq!(decision.next_version, Some(1));
        assert_eq!(decision.version(1).unwrap().status, VersionStatus::Building);
        assert_eq!(decision.current_version, Some(2));

        let decision = manager.deployed(&id, 1, Deployment::default()).await.unwrap();
        assert_eq!(decision.current_version, Some(1));
        assert_eq!(decision.version(1).unwrap().status, VersionStatus::Current);
        assert_eq!(decision.version(2).unwrap().status, VersionStatus::Ready);
    }

    #[tokio::test]
    async fn promote_requires_ready() {
        let manager = manager();
        let decision = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();
        manager
            .deployed(&decision.id, 1, Deployment::default())
            .await
            .unwrap();

        // Version 1 is CURRENT, not READY.
        let result = manager.promote(&tenant(), "approval", 1).await;
        assert!(matches!(
            result,
            Err(ControlError::InvalidTransition {
                from: "current",
                to: "building"
            })
        ));
    }

    #[tokio::test]
    async fn promote_rejected_while_building() {
        let manager = manager();
        manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();

        let result = manager.promote(&tenant(), "approval", 1).await;
        assert!(matches!(result, Err(ControlError::OperationInFlight { .. })));
    }

    #[tokio::test]
    async fn duplicate_deployed_callback_is_rejected() {
        let manager = manager();
        let decision = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();
        let id = decision.id.clone();

        manager.deployed(&id, 1, Deployment::default()).await.unwrap();

        let result = manager.deployed(&id, 1, Deployment::default()).await;
        assert!(matches!(
            result,
            Err(ControlError::VersionMismatch {
                expected: None,
                received: 1
            })
        ));
    }

    #[tokio::test]
    async fn failed_clears_in_flight_and_keeps_current() {
        let manager = manager();
        let decision = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();
        let id = decision.id.clone();
        manager.deployed(&id, 1, Deployment::default()).await.unwrap();
        manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();

        let decision = manager
            .failed(&id, 2, Deployment::dispatch_failure("boom"))
            .await
            .unwrap();

        assert!(decision.next_version.is_none());
        assert_eq!(decision.current_version, Some(1));
        assert_eq!(decision.version(2).unwrap().status, VersionStatus::Failed);
        assert_eq!(decision.version(1).unwrap().status, VersionStatus::Current);
    }

    #[tokio::test]
    async fn repeated_failures_surface_the_freshest() {
        let manager = manager();
        let decision = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();
        let id = decision.id.clone();

        // Version 1 fails while it is both current and next.
        let decision = manager
            .failed(&id, 1, Deployment::dispatch_failure("first"))
            .await
            .unwrap();
        assert_eq!(decision.current_version, Some(1));

        manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();
        let decision = manager
            .failed(&id, 2, Deployment::dispatch_failure("second"))
            .await
            .unwrap();

        assert_eq!(decision.current_version, Some(2));
        assert_eq!(decision.version(2).unwrap().status, VersionStatus::Failed);
    }

    #[tokio::test]
    async fn delete_version_rules() {
        let manager = manager();
        let decision = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();
        let id = decision.id.clone();

        // BUILDING cannot be deleted.
        let result = manager.delete_version(&tenant(), "approval", 1).await;
        assert!(matches!(result, Err(ControlError::InvalidTransition { .. })));

        manager.deployed(&id, 1, Deployment::default()).await.unwrap();

        // CURRENT cannot be deleted.
        let result = manager.delete_version(&tenant(), "approval", 1).await;
        assert!(matches!(result, Err(ControlError::InvalidTransition { .. })));

        manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();
        manager.deployed(&id, 2, Deployment::default()).await.unwrap();

        // Version 1 is READY now; deletion is logical.
        let decision = manager.delete_version(&tenant(), "approval", 1).await.unwrap();
        assert_eq!(decision.version(1).unwrap().status, VersionStatus::Deleted);
        assert_eq!(decision.versions.len(), 2);

        // Deleting again is rejected: DELETED is terminal.
        let result = manager.delete_version(&tenant(), "approval", 1).await;
        assert!(matches!(result, Err(ControlError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn delete_decision_removes_aggregate() {
        let manager = manager();
        let decision = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();

        let deleted = manager.delete_decision(&tenant(), "approval").await.unwrap();
        assert_eq!(deleted.id, decision.id);

        let result = manager.get(&tenant(), "approval").await;
        assert!(matches!(result, Err(ControlError::DecisionNotFound(_))));
    }

    #[tokio::test]
    async fn lookup_by_id_and_name() {
        let manager = manager();
        let decision = manager
            .create_or_update_version(&tenant(), request("approval"))
            .await
            .unwrap();

        let by_name = manager.get(&tenant(), "approval").await.unwrap();
        let by_id = manager.get(&tenant(), decision.id.as_str()).await.unwrap();
        assert_eq!(by_name.id, by_id.id);
    }
}

//! In-memory store for testing and local development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};
use crate::types::{Decision, DecisionId, TenantId, VersionStatus, Webhook, WebhookId};

use super::{DecisionStore, Page, WebhookStore};

/// In-memory store implementing both [`DecisionStore`] and [`WebhookStore`].
///
/// Not suitable for production use: data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    decisions: RwLock<HashMap<String, Decision>>,
    webhooks: RwLock<HashMap<String, Webhook>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionStore for MemoryStore {
    async fn insert(&self, decision: &Decision) -> ControlResult<()> {
        let mut decisions = self
            .decisions
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        if decisions.contains_key(decision.id.as_str()) {
            return Err(ControlError::internal(format!(
                "decision {} already exists",
                decision.id
            )));
        }

        if decisions
            .values()
            .any(|d| d.tenant == decision.tenant && d.name == decision.name)
        {
            return Err(ControlError::DecisionExists {
                tenant: decision.tenant.to_string(),
                name: decision.name.clone(),
            });
        }

        decisions.insert(decision.id.as_str().to_owned(), decision.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &DecisionId) -> ControlResult<Option<Decision>> {
        let decisions = self
            .decisions
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(decisions.get(id.as_str()).cloned())
    }

    async fn find_by_tenant_and_name(
        &self,
        tenant: &TenantId,
        name: &str,
    ) -> ControlResult<Option<Decision>> {
        let decisions = self
            .decisions
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(decisions
            .values()
            .find(|d| &d.tenant == tenant && d.name == name)
            .cloned())
    }

    async fn find_by_tenant_and_ref(
        &self,
        tenant: &TenantId,
        lookup: &str,
    ) -> ControlResult<Option<Decision>> {
        let decisions = self
            .decisions
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(decisions
            .values()
            .find(|d| &d.tenant == tenant && (d.id.as_str() == lookup || d.name == lookup))
            .cloned())
    }

    async fn find_current_by_tenant(
        &self,
        tenant: &TenantId,
        page: Page,
    ) -> ControlResult<Vec<Decision>> {
        let decisions = self
            .decisions
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut results: Vec<_> = decisions
            .values()
            .filter(|d| &d.tenant == tenant && d.current_version.is_some())
            .cloned()
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        #[allow(clippy::as_conversions)]
        let offset = page.offset.unwrap_or(0) as usize;
        let results: Vec<_> = results.into_iter().skip(offset).collect();

        if let Some(limit) = page.limit {
            #[allow(clippy::as_conversions)]
            Ok(results.into_iter().take(limit as usize).collect())
        } else {
            Ok(results)
        }
    }

    async fn find_building_by_tenant(&self, tenant: &TenantId) -> ControlResult<Vec<Decision>> {
        let decisions = self
            .decisions
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut results: Vec<_> = decisions
            .values()
            .filter(|d| {
                &d.tenant == tenant
                    && d.versions
                        .iter()
                        .any(|v| v.status == VersionStatus::Building)
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    async fn update(&self, decision: &Decision) -> ControlResult<()> {
        let mut decisions = self
            .decisions
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let stored = decisions
            .get_mut(decision.id.as_str())
            .ok_or_else(|| ControlError::DecisionNotFound(decision.id.to_string()))?;

        if stored.revision != decision.revision {
            return Err(ControlError::ConcurrentModification {
                decision: decision.name.clone(),
            });
        }

        let mut committed = decision.clone();
        committed.revision = decision.revision + 1;
        committed.updated_at = chrono::Utc::now();
        *stored = committed;

        Ok(())
    }

    async fn delete(&self, tenant: &TenantId, id: &DecisionId) -> ControlResult<()> {
        let mut decisions = self
            .decisions
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        match decisions.get(id.as_str()) {
            Some(d) if &d.tenant == tenant => {
                decisions.remove(id.as_str());
                Ok(())
            }
            _ => Err(ControlError::DecisionNotFound(id.to_string())),
        }
    }

    async fn count_versions_by_status(&self) -> ControlResult<HashMap<VersionStatus, u64>> {
        let decisions = self
            .decisions
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut counts = HashMap::new();
        for decision in decisions.values() {
            for version in &decision.versions {
                *counts.entry(version.status).or_insert(0) += 1;
            }
        }

        Ok(counts)
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn insert(&self, webhook: &Webhook) -> ControlResult<()> {
        let mut webhooks = self
            .webhooks
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        if webhooks
            .values()
            .any(|w| w.tenant == webhook.tenant && w.url == webhook.url)
        {
            return Err(ControlError::WebhookExists {
                tenant: webhook.tenant.to_string(),
                url: webhook.url.clone(),
            });
        }

        webhooks.insert(webhook.id.as_str().to_owned(), webhook.clone());
        Ok(())
    }

    async fn list_all(&self) -> ControlResult<Vec<Webhook>> {
        let webhooks = self
            .webhooks
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(webhooks.values().cloned().collect())
    }

    async fn list_by_tenant(&self, tenant: &TenantId) -> ControlResult<Vec<Webhook>> {
        let webhooks = self
            .webhooks
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(webhooks
            .values()
            .filter(|w| &w.tenant == tenant)
            .cloned()
            .collect())
    }

    async fn delete_by_id(
        &self,
        tenant: &TenantId,
        id: &WebhookId,
    ) -> ControlResult<Vec<Webhook>> {
        let mut webhooks = self
            .webhooks
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        match webhooks.get(id.as_str()) {
            Some(w) if &w.tenant == tenant => {
                let removed = webhooks.remove(id.as_str());
                Ok(removed.into_iter().collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn delete_by_url(&self, tenant: &TenantId, url: &str) -> ControlResult<Vec<Webhook>> {
        let mut webhooks = self
            .webhooks
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let ids: Vec<String> = webhooks
            .values()
            .filter(|w| &w.tenant == tenant && w.url == url)
            .map(|w| w.id.as_str().to_owned())
            .collect();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(w) = webhooks.remove(&id) {
                removed.push(w);
            }
        }

        Ok(removed)
    }
}

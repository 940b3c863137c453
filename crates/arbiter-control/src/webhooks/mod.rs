//! Webhook registration and fan-out.
//!
//! Persisted registrations are the source of truth; the in-memory
//! listeners on the event bus are a rebuildable cache, replayed from the
//! store at startup.

mod delivery;

pub use delivery::{DeliveryPool, DeliveryStats, Envelope, WebhookListener};

use std::sync::Arc;

use tracing::info;

use crate::error::{ControlError, ControlResult};
use crate::events::EventBus;
use crate::store::WebhookStore;
use crate::types::{TenantId, Webhook, WebhookId};

/// Registration surface for lifecycle webhooks.
pub struct WebhookService {
    store: Arc<dyn WebhookStore>,
    bus: Arc<EventBus>,
    pool: DeliveryPool,
}

impl WebhookService {
    /// Create a new webhook service.
    #[must_use]
    pub fn new(store: Arc<dyn WebhookStore>, bus: Arc<EventBus>, pool: DeliveryPool) -> Self {
        Self { store, bus, pool }
    }

    /// The delivery pool, for counter snapshots.
    #[must_use]
    pub fn pool(&self) -> &DeliveryPool {
        &self.pool
    }

    /// Register a webhook for a tenant.
    ///
    /// The URL must parse and use http(s). At most one registration per
    /// (tenant, URL) exists; a duplicate is a conflict.
    pub async fn register(&self, tenant: &TenantId, url: &str) -> ControlResult<Webhook> {
        let parsed = url::Url::parse(url)
            .map_err(|e| ControlError::InvalidRequest(format!("invalid webhook URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ControlError::InvalidRequest(format!(
                "unsupported webhook scheme: {}",
                parsed.scheme()
            )));
        }

        let webhook = Webhook::new(tenant.clone(), url);
        self.store.insert(&webhook).await?;
        self.attach(&webhook)?;

        info!(tenant = %tenant, url = %webhook.url, id = %webhook.id, "webhook registered");

        Ok(webhook)
    }

    /// Unregister by id or literal URL.
    ///
    /// Id-match deletions run first; URL-match deletions follow only when
    /// the lookup parses as a URL. Every removed row's listener is
    /// detached. Fails with NotFound when nothing matched.
    pub async fn unregister(&self, tenant: &TenantId, lookup: &str) -> ControlResult<Vec<Webhook>> {
        let mut removed = self
            .store
            .delete_by_id(tenant, &WebhookId::new(lookup))
            .await?;

        if url::Url::parse(lookup).is_ok() {
            removed.extend(self.store.delete_by_url(tenant, lookup).await?);
        }

        if removed.is_empty() {
            return Err(ControlError::WebhookNotFound(lookup.to_owned()));
        }

        for webhook in &removed {
            self.bus.unsubscribe(webhook.id.as_str())?;
            info!(tenant = %tenant, url = %webhook.url, id = %webhook.id, "webhook unregistered");
        }

        Ok(removed)
    }

    /// List a tenant's registrations.
    pub async fn list(&self, tenant: &TenantId) -> ControlResult<Vec<Webhook>> {
        self.store.list_by_tenant(tenant).await
    }

    /// Rebuild listeners from persisted registrations. Called once at
    /// startup. Returns the number of listeners attached.
    pub async fn replay(&self) -> ControlResult<usize> {
        let webhooks = self.store.list_all().await?;
        for webhook in &webhooks {
            self.attach(webhook)?;
        }

        info!(listeners = webhooks.len(), "webhook listeners replayed");

        Ok(webhooks.len())
    }

    fn attach(&self, webhook: &Webhook) -> ControlResult<()> {
        self.bus.subscribe(
            webhook.id.as_str(),
            Arc::new(WebhookListener::new(&webhook.url, self.pool.clone())),
        )
    }
}

impl std::fmt::Debug for WebhookService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookService").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::WebhookConfig;
    use crate::store::MemoryStore;

    fn service() -> (WebhookService, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let service = WebhookService::new(
            Arc::new(MemoryStore::new()),
            bus.clone(),
            DeliveryPool::new(&WebhookConfig::default()).unwrap(),
        );
        (service, bus)
    }

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    #[tokio::test]
    async fn register_attaches_listener() {
        let (service, bus) = service();

        let webhook = service
            .register(&tenant(), "https://example.com/hook")
            .await
            .unwrap();
        assert_eq!(webhook.url, "https://example.com/hook");
        assert_eq!(bus.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_url_conflicts() {
        let (service, _bus) = service();

        service
            .register(&tenant(), "https://example.com/hook")
            .await
            .unwrap();
        let result = service.register(&tenant(), "https://example.com/hook").await;
        assert!(matches!(result, Err(ControlError::WebhookExists { .. })));

        // Same URL under another tenant is fine.
        service
            .register(&TenantId::new("globex"), "https://example.com/hook")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_urls_are_rejected() {
        let (service, bus) = service();

        assert!(matches!(
            service.register(&tenant(), "not a url").await,
            Err(ControlError::InvalidRequest(_))
        ));
        assert!(matches!(
            service.register(&tenant(), "ftp://example.com/hook").await,
            Err(ControlError::InvalidRequest(_))
        ));
        assert_eq!(bus.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn unregister_by_id_and_by_url() {
        let (service, bus) = service();

        let first = service
            .register(&tenant(), "https://example.com/first")
            .await
            .unwrap();
        service
            .register(&tenant(), "https://example.com/second")
            .await
            .unwrap();
        assert_eq!(bus.len().unwrap(), 2);

        let removed = service
            .unregister(&tenant(), first.id.as_str())
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, first.id);
        assert_eq!(bus.len().unwrap(), 1);

        let removed = service
            .unregister(&tenant(), "https://example.com/second")
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(bus.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn unregister_without_match_is_not_found() {
        let (service, _bus) = service();

        let result = service.unregister(&tenant(), "https://example.com/none").await;
        assert!(matches!(result, Err(ControlError::WebhookNotFound(_))));
    }

    #[tokio::test]
    async fn replay_rebuilds_listeners() {
        let store = Arc::new(MemoryStore::new());
        let pool = DeliveryPool::new(&WebhookConfig::default()).unwrap();

        {
            let bus = Arc::new(EventBus::new());
            let service = WebhookService::new(store.clone(), bus, pool.clone());
            service
                .register(&tenant(), "https://example.com/one")
                .await
                .unwrap();
            service
                .register(&tenant(), "https://example.com/two")
                .await
                .unwrap();
        }

        // Fresh bus, as after a restart.
        let bus = Arc::new(EventBus::new());
        let service = WebhookService::new(store, bus.clone(), pool);
        assert_eq!(bus.len().unwrap(), 0);

        let replayed = service.replay().await.unwrap();
        assert_eq!(replayed, 2);
        assert_eq!(bus.len().unwrap(), 2);
    }
}

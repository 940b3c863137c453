//! Asynchronous webhook delivery.
//!
//! Deliveries are fire-and-forget: each one is a task on a bounded pool,
//! makes exactly one HTTP POST attempt, and reports its outcome only
//! through per-URL counters. The triggering lifecycle call never blocks
//! on, or fails because of, a delivery.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::WebhookConfig;
use crate::error::{ControlError, ControlResult};
use crate::events::{EventListener, LifecycleEvent};

/// Source tag carried in every delivered envelope.
const ENVELOPE_SOURCE: &str = "arbiter-control";

/// Wire form of a delivered event.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// Correlation id of the event.
    pub id: String,
    /// Originating system tag.
    pub source: &'static str,
    /// Dotted event type name.
    #[serde(rename = "type")]
    pub event_type: &'static str,
    /// The event payload, opaque to the delivery layer.
    pub data: serde_json::Value,
}

impl Envelope {
    /// Wrap a lifecycle event for delivery.
    pub fn from_event(event: &LifecycleEvent) -> ControlResult<Self> {
        let data = serde_json::to_value(event)
            .map_err(|e| ControlError::Serialisation(format!("failed to serialise event: {e}")))?;

        Ok(Self {
            id: event.id.clone(),
            source: ENVELOPE_SOURCE,
            event_type: event.type_name(),
            data,
        })
    }
}

/// Per-URL delivery counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeliveryStats {
    /// Deliveries attempted.
    pub attempts: u64,
    /// Deliveries acknowledged with a 2xx.
    pub successes: u64,
    /// Deliveries that errored or received a non-2xx.
    pub failures: u64,
}

/// Bounded pool of in-flight webhook deliveries.
#[derive(Clone)]
pub struct DeliveryPool {
    client: Client,
    permits: Arc<Semaphore>,
    stats: Arc<RwLock<HashMap<String, DeliveryStats>>>,
}

impl DeliveryPool {
    /// Create a delivery pool from configuration. The configured timeout
    /// bounds each attempt through the HTTP client.
    pub fn new(config: &WebhookConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.delivery_timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            stats: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Submit one delivery. Returns immediately; the attempt runs on the
    /// pool and its outcome lands in the counters.
    pub fn submit(&self, url: String, envelope: Envelope) -> JoinHandle<()> {
        let client = self.client.clone();
        let permits = Arc::clone(&self.permits);
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            // Closed-semaphore errors cannot happen: the pool never closes
            // its semaphore.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };

            record(&stats, &url, |s| s.attempts += 1);

            match client.post(&url).json(&envelope).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(url = %url, event_id = %envelope.id, "webhook delivered");
                    record(&stats, &url, |s| s.successes += 1);
                }
                Ok(response) => {
                    warn!(
                        url = %url,
                        event_id = %envelope.id,
                        status = %response.status(),
                        "webhook delivery rejected"
                    );
                    record(&stats, &url, |s| s.failures += 1);
                }
                Err(e) => {
                    warn!(url = %url, event_id = %envelope.id, error = %e, "webhook delivery failed");
                    record(&stats, &url, |s| s.failures += 1);
                }
            }
        })
    }

    /// Snapshot of the per-URL counters.
    pub fn stats(&self) -> ControlResult<HashMap<String, DeliveryStats>> {
        let stats = self
            .stats
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(stats.clone())
    }
}

impl std::fmt::Debug for DeliveryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPool").finish_non_exhaustive()
    }
}

fn record(
    stats: &RwLock<HashMap<String, DeliveryStats>>,
    url: &str,
    update: impl FnOnce(&mut DeliveryStats),
) {
    if let Ok(mut stats) = stats.write() {
        update(stats.entry(url.to_owned()).or_default());
    }
}

/// One registered webhook's view of the event bus.
///
/// Wraps each event in an [`Envelope`] and hands it to the pool. Nothing
/// here blocks the publisher.
pub struct WebhookListener {
    url: String,
    pool: DeliveryPool,
}

impl WebhookListener {
    /// Create a listener delivering to the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>, pool: DeliveryPool) -> Self {
        Self {
            url: url.into(),
            pool,
        }
    }
}

impl EventListener for WebhookListener {
    fn deliver(&self, event: &LifecycleEvent) {
        match Envelope::from_event(event) {
            Ok(envelope) => {
                drop(self.pool.submit(self.url.clone(), envelope));
            }
            Err(e) => {
                warn!(url = %self.url, event_id = %event.id, error = %e, "event not deliverable");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::events::{EventBus, EventKind};
    use crate::types::TenantId;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool() -> DeliveryPool {
        DeliveryPool::new(&WebhookConfig {
            max_in_flight: 4,
            delivery_timeout_secs: 5,
        })
        .unwrap()
    }

    fn event() -> LifecycleEvent {
        LifecycleEvent::new(EventKind::BeforeCreateOrUpdate {
            tenant: TenantId::new("acme"),
            decision_name: "approval".to_owned(),
        })
    }

    /// Serve the given status on 127.0.0.1:0, counting requests.
    async fn spawn_target(status: StatusCode) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let handler_hits = hits.clone();

        let app = Router::new().route(
            "/hook",
            post(move || {
                let hits = handler_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    status
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/hook"), hits)
    }

    #[test]
    fn envelope_shape() {
        let event = event();
        let envelope = Envelope::from_event(&event).unwrap();
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["id"], event.id.as_str());
        assert_eq!(json["source"], "arbiter-control");
        assert_eq!(json["type"], "decision.create_or_update.before");
        assert_eq!(json["data"]["decision_name"], "approval");
        assert_eq!(json["data"]["tenant"], "acme");
    }

    #[tokio::test]
    async fn successful_delivery_is_counted() {
        let (url, hits) = spawn_target(StatusCode::OK).await;
        let pool = pool();

        let envelope = Envelope::from_event(&event()).unwrap();
        pool.submit(url.clone(), envelope).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let stats = pool.stats().unwrap();
        let counters = stats.get(&url).unwrap();
        assert_eq!(counters.attempts, 1);
        assert_eq!(counters.successes, 1);
        assert_eq!(counters.failures, 0);
    }

    #[tokio::test]
    async fn rejected_delivery_is_counted_not_retried() {
        let (url, hits) = spawn_target(StatusCode::INTERNAL_SERVER_ERROR).await;
        let pool = pool();

        let envelope = Envelope::from_event(&event()).unwrap();
        pool.submit(url.clone(), envelope).await.unwrap();

        // Exactly one attempt, no retry.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let stats = pool.stats().unwrap();
        let counters = stats.get(&url).unwrap();
        assert_eq!(counters.attempts, 1);
        assert_eq!(counters.failures, 1);
    }

    #[tokio::test]
    async fn unreachable_target_is_counted() {
        let pool = pool();
        // Nothing listens on this port.
        let url = "http://127.0.0.1:9/hook".to_owned();

        let envelope = Envelope::from_event(&event()).unwrap();
        pool.submit(url.clone(), envelope).await.unwrap();

        let stats = pool.stats().unwrap();
        let counters = stats.get(&url).unwrap();
        assert_eq!(counters.attempts, 1);
        assert_eq!(counters.failures, 1);
    }

    #[tokio::test]
    async fn failing_target_does_not_block_other_listeners() {
        let (good_url, good_hits) = spawn_target(StatusCode::OK).await;
        let (bad_url, bad_hits) = spawn_target(StatusCode::INTERNAL_SERVER_ERROR).await;
        let pool = pool();

        let bus = EventBus::new();
        bus.subscribe("bad", Arc::new(WebhookListener::new(&bad_url, pool.clone())))
            .unwrap();
        bus.subscribe("good", Arc::new(WebhookListener::new(&good_url, pool.clone())))
            .unwrap();

        // Publishing never errors regardless of delivery outcome.
        bus.notify(event);

        // Deliveries are async; wait for both counters to land.
        for _ in 0..100 {
            if good_hits.load(Ordering::SeqCst) == 1 && bad_hits.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(good_hits.load(Ordering::SeqCst), 1);
        assert_eq!(bad_hits.load(Ordering::SeqCst), 1);
    }
}

//! In-process lifecycle event bus.
//!
//! Lifecycle operations publish events through [`EventBus::notify`], which
//! takes a supplier rather than a materialised event so that event
//! construction is skipped entirely when nobody is listening. Listener
//! failures are isolated: a panicking listener is logged and the remaining
//! listeners still receive the event.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{ControlError, ControlResult};
use crate::types::{DecisionId, Deployment, TenantId};

/// A lifecycle event with a unique correlation id.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    /// Correlation id, unique per published event.
    pub id: String,
    /// What happened.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl LifecycleEvent {
    /// Create an event with a fresh correlation id.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            kind,
        }
    }

    /// Dotted event type name, stable across releases.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self.kind {
            EventKind::BeforeCreateOrUpdate { .. } => "decision.create_or_update.before",
            EventKind::AfterDeployed { .. } => "decision.version.deployed",
            EventKind::AfterFailed { .. } => "decision.version.failed",
        }
    }
}

/// The lifecycle moments observers can hook.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventKind {
    /// A create-or-update request was accepted, before any state changed.
    BeforeCreateOrUpdate {
        /// Owning tenant.
        tenant: TenantId,
        /// Decision name as submitted.
        decision_name: String,
    },
    /// A version completed deployment and became current.
    AfterDeployed {
        /// Owning tenant.
        tenant: TenantId,
        /// Decision id.
        decision_id: DecisionId,
        /// Decision name.
        decision_name: String,
        /// The version that was deployed.
        version: u64,
        /// Remote deployment descriptor, if the callback carried one.
        #[serde(skip_serializing_if = "Option::is_none")]
        deployment: Option<Deployment>,
    },
    /// A lifecycle operation on a version failed.
    AfterFailed {
        /// Owning tenant.
        tenant: TenantId,
        /// Decision id.
        decision_id: DecisionId,
        /// Decision name.
        decision_name: String,
        /// The version that failed.
        version: u64,
        /// Failure detail, if known.
        #[serde(skip_serializing_if = "Option::is_none")]
        deployment: Option<Deployment>,
    },
}

/// Receives lifecycle events.
///
/// Delivery is synchronous with respect to the bus; listeners that do real
/// work should hand off internally (see the webhook listener, which spawns
/// its deliveries onto a bounded pool).
pub trait EventListener: Send + Sync {
    /// Handle one event.
    fn deliver(&self, event: &LifecycleEvent);
}

/// Keyed registry of lifecycle event listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Arc<dyn EventListener>>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under a key, replacing any existing listener
    /// with the same key.
    pub fn subscribe(&self, key: impl Into<String>, listener: Arc<dyn EventListener>) -> ControlResult<()> {
        let mut listeners = self
            .listeners
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        listeners.insert(key.into(), listener);
        Ok(())
    }

    /// Remove a listener. Returns whether one was registered under the key.
    pub fn unsubscribe(&self, key: &str) -> ControlResult<bool> {
        let mut listeners = self
            .listeners
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(listeners.remove(key).is_some())
    }

    /// Number of registered listeners.
    pub fn len(&self) -> ControlResult<usize> {
        let listeners = self
            .listeners
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(listeners.len())
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> ControlResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Publish an event to all listeners.
    ///
    /// The supplier runs only if at least one listener is registered. Each
    /// listener is isolated: a panic is caught and logged, and the event is
    /// still handed to the rest.
    pub fn notify<F>(&self, supplier: F)
    where
        F: FnOnce() -> LifecycleEvent,
    {
        let targets: Vec<(String, Arc<dyn EventListener>)> = {
            let Ok(listeners) = self.listeners.read() else {
                warn!("event bus lock poisoned, dropping event");
                return;
            };
            if listeners.is_empty() {
                return;
            }
            listeners
                .iter()
                .map(|(k, l)| (k.clone(), Arc::clone(l)))
                .collect()
        };

        let event = supplier();
        debug!(
            event_id = %event.id,
            event_type = event.type_name(),
            listeners = targets.len(),
            "publishing lifecycle event"
        );

        for (key, listener) in targets {
            let result = catch_unwind(AssertUnwindSafe(|| listener.deliver(&event)));
            if result.is_err() {
                error!(
                    listener = %key,
                    event_id = %event.id,
                    event_type = event.type_name(),
                    "listener panicked while handling event"
                );
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        seen: AtomicUsize,
    }

    impl EventListener for CountingListener {
        fn deliver(&self, _event: &LifecycleEvent) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingListener;

    impl EventListener for PanickingListener {
        fn deliver(&self, _event: &LifecycleEvent) {
            panic!("listener bug");
        }
    }

    fn before_event() -> LifecycleEvent {
        LifecycleEvent::new(EventKind::BeforeCreateOrUpdate {
            tenant: TenantId::new("acme"),
            decision_name: "approval".to_owned(),
        })
    }

    #[test]
    fn supplier_skipped_when_no_listeners() {
        let bus = EventBus::new();
        let invoked = AtomicUsize::new(0);

        bus.notify(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            before_event()
        });

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn supplier_runs_once_with_listeners() {
        let bus = EventBus::new();
        let first = Arc::new(CountingListener {
            seen: AtomicUsize::new(0),
        });
        let second = Arc::new(CountingListener {
            seen: AtomicUsize::new(0),
        });
        bus.subscribe("first", first.clone()).unwrap();
        bus.subscribe("second", second.clone()).unwrap();

        let invoked = AtomicUsize::new(0);
        bus.notify(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            before_event()
        });

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(first.seen.load(Ordering::SeqCst), 1);
        assert_eq!(second.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let bus = EventBus::new();
        let counting = Arc::new(CountingListener {
            seen: AtomicUsize::new(0),
        });
        bus.subscribe("panicking", Arc::new(PanickingListener)).unwrap();
        bus.subscribe("counting", counting.clone()).unwrap();

        bus.notify(before_event);
        bus.notify(before_event);

        assert_eq!(counting.seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let bus = EventBus::new();
        let counting = Arc::new(CountingListener {
            seen: AtomicUsize::new(0),
        });
        bus.subscribe("hook", counting.clone()).unwrap();
        assert_eq!(bus.len().unwrap(), 1);

        assert!(bus.unsubscribe("hook").unwrap());
        assert!(!bus.unsubscribe("hook").unwrap());

        bus.notify(before_event);
        assert_eq!(counting.seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn event_type_names() {
        assert_eq!(before_event().type_name(), "decision.create_or_update.before");

        let deployed = LifecycleEvent::new(EventKind::AfterDeployed {
            tenant: TenantId::new("acme"),
            decision_id: DecisionId::generate(),
            decision_name: "approval".to_owned(),
            version: 3,
            deployment: None,
        });
        assert_eq!(deployed.type_name(), "decision.version.deployed");

        let failed = LifecycleEvent::new(EventKind::AfterFailed {
            tenant: TenantId::new("acme"),
            decision_id: DecisionId::generate(),
            decision_name: "approval".to_owned(),
            version: 3,
            deployment: Some(Deployment::dispatch_failure("boom")),
        });
        assert_eq!(failed.type_name(), "decision.version.failed");
    }
}

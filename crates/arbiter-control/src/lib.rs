//! Arbiter control plane.
//!
//! Manages the versioned lifecycle of tenant-owned decisions: artifacts
//! built locally, deployed to a remote platform, and observed by external
//! subscribers through webhooks.
//!
//! # Architecture
//!
//! The control plane is responsible for:
//!
//! - **Lifecycle management**: Versioned decision aggregates with a single
//!   in-flight operation per decision, enforced through optimistic locking
//! - **Deployment orchestration**: Sequencing local commits with remote
//!   deploy calls across an asynchronous create/callback protocol, with
//!   compensating transitions when a deploy request fails outright
//! - **Webhook fan-out**: Best-effort, fire-and-forget delivery of
//!   lifecycle events to tenant-registered URLs
//! - **API surface**: HTTP endpoints for submissions, queries, platform
//!   callbacks and webhook registration
//!
//! # Version state machine
//!
//! ```text
//!           deploy ok               promote
//! BUILDING ──────────▶ CURRENT ──▶ READY ──▶ BUILDING ...
//!     │                                │
//!     ▼ deploy failed                  ▼ delete
//!  FAILED ──────────────────────▶ DELETED
//! ```
//!
//! A version is BUILDING exactly while a lifecycle operation is in flight
//! for it; duplicate or stale completion callbacks are rejected rather
//! than reapplied.

#![forbid(unsafe_code)]

pub mod api;
pub mod artifacts;
pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod fleet;
pub mod lifecycle;
pub mod orchestrator;
pub mod store;
pub mod types;
pub mod webhooks;

// Re-export commonly used types at the crate root
pub use config::ControlConfig;
pub use error::{ControlError, ControlResult};
pub use events::{EventBus, EventKind, EventListener, LifecycleEvent};
pub use lifecycle::{CreateVersionRequest, LifecycleManager};
pub use orchestrator::DeploymentOrchestrator;
pub use store::{DecisionStore, MemoryStore, Page, PostgresStore, WebhookStore};
pub use types::{
    Decision, DecisionId, DecisionVersion, Deployment, TenantId, VersionStatus, Webhook, WebhookId,
};
pub use webhooks::WebhookService;

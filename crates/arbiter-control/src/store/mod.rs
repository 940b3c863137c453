//! Persistence backends for decisions and webhook registrations.
//!
//! This module provides traits and implementations for persisting the
//! decision aggregate and webhook rows. The primary implementation uses
//! PostgreSQL; an in-memory implementation is provided for testing and
//! local development.
//!
//! The decision aggregate is the unit of consistency. Every mutation is a
//! read-modify-write mediated by the aggregate's `revision` counter:
//! [`DecisionStore::update`] compares-and-swaps on it, and a losing writer
//! receives [`ControlError::ConcurrentModification`].

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ControlResult;
use crate::types::{Decision, DecisionId, TenantId, VersionStatus, Webhook, WebhookId};

/// Pagination window for list queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Page {
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl Page {
    /// Create an unbounded page.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            limit: None,
            offset: None,
        }
    }

    /// Set maximum results.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set pagination offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Backend for storing decision aggregates.
///
/// Each method is an explicit query contract; there is no query language
/// in between.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Insert a new decision.
    ///
    /// Fails with a conflict if the id or the (tenant, name) pair already
    /// exists. The (tenant, name) uniqueness is what breaks the tie between
    /// two concurrent first-time creates of the same decision.
    async fn insert(&self, decision: &Decision) -> ControlResult<()>;

    /// Look up a decision by id, across tenants.
    ///
    /// Used by the callback path, which carries no tenant.
    async fn find_by_id(&self, id: &DecisionId) -> ControlResult<Option<Decision>>;

    /// Look up a decision by tenant and name.
    async fn find_by_tenant_and_name(
        &self,
        tenant: &TenantId,
        name: &str,
    ) -> ControlResult<Option<Decision>>;

    /// Look up a decision by tenant and either id or name.
    async fn find_by_tenant_and_ref(
        &self,
        tenant: &TenantId,
        lookup: &str,
    ) -> ControlResult<Option<Decision>>;

    /// List a tenant's decisions that have a current version, paged,
    /// newest first.
    async fn find_current_by_tenant(
        &self,
        tenant: &TenantId,
        page: Page,
    ) -> ControlResult<Vec<Decision>>;

    /// List a tenant's decisions with a version currently building.
    async fn find_building_by_tenant(&self, tenant: &TenantId) -> ControlResult<Vec<Decision>>;

    /// Commit an updated aggregate.
    ///
    /// Compares-and-swaps on `decision.revision`: the stored row must still
    /// carry the same revision, which is then incremented. A losing writer
    /// receives `ConcurrentModification` and must re-read and retry.
    async fn update(&self, decision: &Decision) -> ControlResult<()>;

    /// Hard-delete a decision and all its versions.
    async fn delete(&self, tenant: &TenantId, id: &DecisionId) -> ControlResult<()>;

    /// Count versions across all tenants, grouped by status.
    ///
    /// Used by the readiness and metrics endpoints.
    async fn count_versions_by_status(&self) -> ControlResult<HashMap<VersionStatus, u64>>;
}

/// Backend for storing webhook registrations.
///
/// The persisted rows are the source of truth; in-memory listeners are a
/// rebuildable cache replayed from here at startup.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Insert a new webhook registration.
    ///
    /// Fails with a conflict if the (tenant, url) pair already exists.
    async fn insert(&self, webhook: &Webhook) -> ControlResult<()>;

    /// List all webhook registrations across tenants.
    async fn list_all(&self) -> ControlResult<Vec<Webhook>>;

    /// List a tenant's webhook registrations.
    async fn list_by_tenant(&self, tenant: &TenantId) -> ControlResult<Vec<Webhook>>;

    /// Delete a registration by id. Returns the removed rows.
    async fn delete_by_id(
        &self,
        tenant: &TenantId,
        id: &WebhookId,
    ) -> ControlResult<Vec<Webhook>>;

    /// Delete registrations matching a literal URL. Returns the removed rows.
    async fn delete_by_url(&self, tenant: &TenantId, url: &str) -> ControlResult<Vec<Webhook>>;
}

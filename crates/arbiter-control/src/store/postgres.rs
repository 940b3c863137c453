//! PostgreSQL store implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::error::{ControlError, ControlResult};
use crate::types::{
    Decision, DecisionId, DecisionVersion, TenantId, VersionStatus, Webhook, WebhookId,
};

use super::{DecisionStore, Page, WebhookStore};

/// PostgreSQL-backed store implementing both [`DecisionStore`] and
/// [`WebhookStore`].
///
/// The decision aggregate is stored as one row with the versions collection
/// in a JSONB column; the `revision` column carries the optimistic lock
/// counter and is checked in the WHERE clause of every update.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(url: &str, max_connections: u32) -> ControlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> ControlResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> ControlResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL,
                name TEXT NOT NULL,
                current_version BIGINT,
                next_version BIGINT,
                versions JSONB NOT NULL,
                revision BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (tenant, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhooks (
                id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL,
                url TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (tenant, url)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_decisions_tenant
            ON decisions (tenant, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Parse a row into a Decision aggregate.
    fn row_to_decision(row: &sqlx::postgres::PgRow) -> ControlResult<Decision> {
        let id: String = row.get("id");
        let tenant: String = row.get("tenant");
        let name: String = row.get("name");
        let current_version: Option<i64> = row.get("current_version");
        let next_version: Option<i64> = row.get("next_version");
        let versions_json: serde_json::Value = row.get("versions");
        let revision: i64 = row.get("revision");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

        let versions: Vec<DecisionVersion> =
            serde_json::from_value(versions_json).map_err(|e| {
                ControlError::Serialisation(format!("failed to deserialise versions: {e}"))
            })?;

        #[allow(clippy::as_conversions)]
        Ok(Decision {
            id: DecisionId::new(id),
            tenant: TenantId::new(tenant),
            name,
            current_version: current_version.map(|v| v as u64),
            next_version: next_version.map(|v| v as u64),
            versions,
            revision: revision as u64,
            created_at,
            updated_at,
        })
    }

    fn row_to_webhook(row: &sqlx::postgres::PgRow) -> Webhook {
        let id: String = row.get("id");
        let tenant: String = row.get("tenant");
        let url: String = row.get("url");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");

        Webhook {
            id: WebhookId::new(id),
            tenant: TenantId::new(tenant),
            url,
            created_at,
        }
    }

    fn versions_json(decision: &Decision) -> ControlResult<serde_json::Value> {
        serde_json::to_value(&decision.versions)
            .map_err(|e| ControlError::Serialisation(format!("failed to serialise versions: {e}")))
    }
}

#[async_trait]
impl DecisionStore for PostgresStore {
    async fn insert(&self, decision: &Decision) -> ControlResult<()> {
        let versions = Self::versions_json(decision)?;

        #[allow(clippy::as_conversions)]
        let result = sqlx::query(
            r#"
            INSERT INTO decisions (
                id, tenant, name, current_version, next_version,
                versions, revision, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(decision.id.as_str())
        .bind(decision.tenant.as_str())
        .bind(&decision.name)
        .bind(decision.current_version.map(|v| v as i64))
        .bind(decision.next_version.map(|v| v as i64))
        .bind(&versions)
        .bind(decision.revision as i64)
        .bind(decision.created_at)
        .bind(decision.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(ControlError::DecisionExists {
                    tenant: decision.tenant.to_string(),
                    name: decision.name.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: &DecisionId) -> ControlResult<Option<Decision>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant, name, current_version, next_version,
                   versions, revision, created_at, updated_at
            FROM decisions
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_decision(&r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_tenant_and_name(
        &self,
        tenant: &TenantId,
        name: &str,
    ) -> ControlResult<Option<Decision>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant, name, current_version, next_version,
                   versions, revision, created_at, updated_at
            FROM decisions
            WHERE tenant = $1 AND name = $2
            "#,
        )
        .bind(tenant.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_decision(&r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_tenant_and_ref(
        &self,
        tenant: &TenantId,
        lookup: &str,
    ) -> ControlResult<Option<Decision>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant, name, current_version, next_version,
                   versions, revision, created_at, updated_at
            FROM decisions
            WHERE tenant = $1 AND (id = $2 OR name = $2)
            "#,
        )
        .bind(tenant.as_str())
        .bind(lookup)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_decision(&r)?)),
            None => Ok(None),
        }
    }

    async fn find_current_by_tenant(
        &self,
        tenant: &TenantId,
        page: Page,
    ) -> ControlResult<Vec<Decision>> {
        let mut query = String::from(
            r#"
            SELECT id, tenant, name, current_version, next_version,
                   versions, revision, created_at, updated_at
            FROM decisions
            WHERE tenant = $1 AND current_version IS NOT NULL
            ORDER BY created_at DESC
            "#,
        );

        if let Some(limit) = page.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        if let Some(offset) = page.offset {
            query.push_str(&format!(" OFFSET {offset}"));
        }

        let rows = sqlx::query(&query)
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_decision).collect()
    }

    async fn find_building_by_tenant(&self, tenant: &TenantId) -> ControlResult<Vec<Decision>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant, name, current_version, next_version,
                   versions, revision, created_at, updated_at
            FROM decisions
            WHERE tenant = $1
              AND EXISTS (
                  SELECT 1 FROM jsonb_array_elements(versions) elem
                  WHERE elem->>'status' = 'building'
              )
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_decision).collect()
    }

    async fn update(&self, decision: &Decision) -> ControlResult<()> {
        let versions = Self::versions_json(decision)?;

        #[allow(clippy::as_conversions)]
        let result = sqlx::query(
            r#"
            UPDATE decisions
            SET current_version = $1,
                next_version = $2,
                versions = $3,
                revision = revision + 1,
                updated_at = NOW()
            WHERE id = $4 AND revision = $5
            "#,
        )
        .bind(decision.current_version.map(|v| v as i64))
        .bind(decision.next_version.map(|v| v as i64))
        .bind(&versions)
        .bind(decision.id.as_str())
        .bind(decision.revision as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM decisions WHERE id = $1)")
                    .bind(decision.id.as_str())
                    .fetch_one(&self.pool)
                    .await?;

            if exists {
                return Err(ControlError::ConcurrentModification {
                    decision: decision.name.clone(),
                });
            }
            return Err(ControlError::DecisionNotFound(decision.id.to_string()));
        }

        Ok(())
    }

    async fn delete(&self, tenant: &TenantId, id: &DecisionId) -> ControlResult<()> {
        let result = sqlx::query("DELETE FROM decisions WHERE tenant = $1 AND id = $2")
            .bind(tenant.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::DecisionNotFound(id.to_string()));
        }

        Ok(())
    }

    async fn count_versions_by_status(&self) -> ControlResult<HashMap<VersionStatus, u64>> {
        let rows = sqlx::query(
            r#"
            SELECT elem->>'status' AS status, COUNT(*) AS count
            FROM decisions
            CROSS JOIN LATERAL jsonb_array_elements(versions) elem
            GROUP BY 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status_str: String = row.get("status");
            let count: i64 = row.get("count");

            let status: VersionStatus = status_str.parse().map_err(|e| {
                ControlError::Serialisation(format!("failed to parse status '{status_str}': {e}"))
            })?;

            #[allow(clippy::as_conversions)]
            counts.insert(status, count as u64);
        }

        Ok(counts)
    }
}

#[async_trait]
impl WebhookStore for PostgresStore {
    async fn insert(&self, webhook: &Webhook) -> ControlResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhooks (id, tenant, url, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(webhook.id.as_str())
        .bind(webhook.tenant.as_str())
        .bind(&webhook.url)
        .bind(webhook.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(ControlError::WebhookExists {
                    tenant: webhook.tenant.to_string(),
                    url: webhook.url.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_all(&self) -> ControlResult<Vec<Webhook>> {
        let rows = sqlx::query("SELECT id, tenant, url, created_at FROM webhooks")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(Self::row_to_webhook).collect())
    }

    async fn list_by_tenant(&self, tenant: &TenantId) -> ControlResult<Vec<Webhook>> {
        let rows = sqlx::query("SELECT id, tenant, url, created_at FROM webhooks WHERE tenant = $1")
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(Self::row_to_webhook).collect())
    }

    async fn delete_by_id(
        &self,
        tenant: &TenantId,
        id: &WebhookId,
    ) -> ControlResult<Vec<Webhook>> {
        let rows = sqlx::query(
            r#"
            DELETE FROM webhooks
            WHERE tenant = $1 AND id = $2
            RETURNING id, tenant, url, created_at
            "#,
        )
        .bind(tenant.as_str())
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_webhook).collect())
    }

    async fn delete_by_url(&self, tenant: &TenantId, url: &str) -> ControlResult<Vec<Webhook>> {
        let rows = sqlx::query(
            r#"
            DELETE FROM webhooks
            WHERE tenant = $1 AND url = $2
            RETURNING id, tenant, url, created_at
            "#,
        )
        .bind(tenant.as_str())
        .bind(url)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_webhook).collect())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

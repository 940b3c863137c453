//! Artifact storage using object_store.
//!
//! Submitted decision definitions are written to object storage before the
//! owning version is committed, keyed by tenant, decision and version
//! number. Supports local filesystem, S3-compatible, and in-memory
//! backends, selected by the configured store URL.

use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::ArtifactConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{ArtifactRef, DecisionId, TenantId};

/// Storage for submitted decision definitions.
pub struct ArtifactStorage {
    store: Arc<dyn ObjectStore>,
    store_url: String,
}

impl ArtifactStorage {
    /// Create artifact storage from configuration.
    pub fn new(config: &ArtifactConfig) -> ControlResult<Self> {
        let store = create_object_store(config)?;
        Ok(Self {
            store,
            store_url: config.store_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Create artifact storage with a pre-configured object store.
    #[must_use]
    pub fn with_store(store: Arc<dyn ObjectStore>, store_url: impl Into<String>) -> Self {
        Self {
            store,
            store_url: store_url.into(),
        }
    }

    /// In-memory storage for tests and local development.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_store(
            Arc::new(object_store::memory::InMemory::new()),
            "memory://artifacts",
        )
    }

    /// Write a version's definition and return its location and content hash.
    pub async fn write(
        &self,
        tenant: &TenantId,
        decision: &DecisionId,
        version: u64,
        definition: &serde_json::Value,
    ) -> ControlResult<ArtifactRef> {
        let data = serde_json::to_vec_pretty(definition)
            .map_err(|e| ControlError::Serialisation(format!("failed to serialise definition: {e}")))?;

        let content_hash = hex::encode(Sha256::digest(&data));
        let path = artifact_path(tenant, decision, version);

        debug!(path = %path, size = data.len(), "writing artifact");
        self.store.put(&path, Bytes::from(data).into()).await?;

        Ok(ArtifactRef {
            provider_url: format!("{}/{path}", self.store_url),
            content_hash,
        })
    }

    /// Read back a version's definition.
    pub async fn read(
        &self,
        tenant: &TenantId,
        decision: &DecisionId,
        version: u64,
    ) -> ControlResult<serde_json::Value> {
        let path = artifact_path(tenant, decision, version);

        let result = self.store.get(&path).await?;
        let data = result.bytes().await?;

        serde_json::from_slice(&data)
            .map_err(|e| ControlError::Serialisation(format!("failed to parse definition: {e}")))
    }

    /// Delete all artifacts belonging to a decision. Best effort: failures
    /// are logged and skipped so decision deletion can proceed.
    pub async fn delete_decision(&self, tenant: &TenantId, decision: &DecisionId) {
        let prefix = ObjectPath::from(format!("{}/{}", tenant.as_str(), decision.as_str()));

        use futures::StreamExt;
        let mut stream = self.store.list(Some(&prefix));
        let mut deleted = 0_u64;

        while let Some(result) = stream.next().await {
            match result {
                Ok(meta) => {
                    if let Err(e) = self.store.delete(&meta.location).await {
                        warn!(path = %meta.location, error = %e, "failed to delete artifact");
                    } else {
                        deleted += 1;
                    }
                }
                Err(e) => {
                    warn!(tenant = %tenant, decision = %decision, error = %e, "artifact listing failed");
                    return;
                }
            }
        }

        info!(tenant = %tenant, decision = %decision, deleted, "decision artifacts deleted");
    }
}

impl std::fmt::Debug for ArtifactStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStorage")
            .field("store_url", &self.store_url)
            .finish_non_exhaustive()
    }
}

fn artifact_path(tenant: &TenantId, decision: &DecisionId, version: u64) -> ObjectPath {
    ObjectPath::from(format!(
        "{}/{}/{version}/decision.json",
        tenant.as_str(),
        decision.as_str()
    ))
}

/// Create an object store from configuration.
fn create_object_store(config: &ArtifactConfig) -> ControlResult<Arc<dyn ObjectStore>> {
    let url = url::Url::parse(&config.store_url)
        .map_err(|e| ControlError::Config(format!("invalid artifact store URL: {e}")))?;

    match url.scheme() {
        "file" => {
            let store = object_store::local::LocalFileSystem::new_with_prefix(url.path())?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(object_store::memory::InMemory::new())),
        "s3" => {
            use object_store::aws::AmazonS3Builder;
            let bucket = url.host_str().ok_or_else(|| {
                ControlError::Config("S3 store URL is missing a bucket name".to_owned())
            })?;
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

            if let Some(region) = &config.region {
                builder = builder.with_region(region);
            }
            if let Some(endpoint) = &config.endpoint {
                builder = builder.with_endpoint(endpoint).with_allow_http(true);
            }
            if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
                builder = builder
                    .with_access_key_id(key)
                    .with_secret_access_key(secret);
            }

            Ok(Arc::new(builder.build()?))
        }
        scheme => Err(ControlError::Config(format!(
            "unsupported artifact store scheme: {scheme}"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_and_read_roundtrip() {
        let storage = ArtifactStorage::in_memory();
        let tenant = TenantId::new("acme");
        let decision = DecisionId::generate();
        let definition = serde_json::json!({"rules": [{"if": "amount > 100", "then": "review"}]});

        let artifact = storage
            .write(&tenant, &decision, 1, &definition)
            .await
            .unwrap();
        assert!(artifact.provider_url.ends_with("/1/decision.json"));
        assert_eq!(artifact.content_hash.len(), 64);

        let read_back = storage.read(&tenant, &decision, 1).await.unwrap();
        assert_eq!(read_back, definition);
    }

    #[tokio::test]
    async fn identical_content_hashes_identically() {
        let storage = ArtifactStorage::in_memory();
        let tenant = TenantId::new("acme");
        let decision = DecisionId::generate();
        let definition = serde_json::json!({"rules": []});

        let first = storage
            .write(&tenant, &decision, 1, &definition)
            .await
            .unwrap();
        let second = storage
            .write(&tenant, &decision, 2, &definition)
            .await
            .unwrap();

        assert_eq!(first.content_hash, second.content_hash);
        assert_ne!(first.provider_url, second.provider_url);
    }

    #[tokio::test]
    async fn delete_decision_removes_all_versions() {
        let storage = ArtifactStorage::in_memory();
        let tenant = TenantId::new("acme");
        let decision = DecisionId::generate();
        let definition = serde_json::json!({"rules": []});

        storage
            .write(&tenant, &decision, 1, &definition)
            .await
            .unwrap();
        storage
            .write(&tenant, &decision, 2, &definition)
            .await
            .unwrap();

        storage.delete_decision(&tenant, &decision).await;

        assert!(storage.read(&tenant, &decision, 1).await.is_err());
        assert!(storage.read(&tenant, &decision, 2).await.is_err());
    }

    #[test]
    fn rejects_unknown_store_scheme() {
        let config = ArtifactConfig {
            store_url: "ftp://nope".to_owned(),
            ..ArtifactConfig::default()
        };
        assert!(matches!(
            ArtifactStorage::new(&config),
            Err(ControlError::Config(_))
        ));
    }
}

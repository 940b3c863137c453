//! Core types for arbiter-control.

use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a new tenant ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionId(String);

impl DecisionId {
    /// Create a decision ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique decision ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DecisionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a webhook registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookId(String);

impl WebhookId {
    /// Create a webhook ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique webhook ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for WebhookId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a decision version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// A lifecycle operation is in flight for this version.
    Building,
    /// Previously deployed, available for promotion.
    Ready,
    /// Live on the remote platform.
    Current,
    /// The last lifecycle operation on this version failed.
    Failed,
    /// Logically deleted, retained for history. Terminal.
    Deleted,
}

impl VersionStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Ready => "ready",
            Self::Current => "current",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }

    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "building" => Ok(Self::Building),
            "ready" => Ok(Self::Ready),
            "current" => Ok(Self::Current),
            "failed" => Ok(Self::Failed),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("unknown version status: {s}")),
        }
    }
}

/// Location and content hash of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Provider URL of the artifact in object storage.
    pub provider_url: String,
    /// Hex-encoded SHA-256 of the artifact content.
    pub content_hash: String,
}

/// Remote-assigned deployment identifiers and status.
///
/// Produced either from a completion callback payload or synthesised
/// locally when the initial deploy request itself fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Deployment {
    /// Target namespace on the remote platform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Remote resource name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    /// Remote version-resource identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_resource_id: Option<String>,
    /// URL addressing this specific version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_url: Option<String>,
    /// URL addressing whatever version is current.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    /// Human-readable status message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl Deployment {
    /// Synthesise a deployment descriptor for a deploy request that failed
    /// before the remote platform accepted it.
    #[must_use]
    pub fn dispatch_failure(message: impl Into<String>) -> Self {
        Self {
            status_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Per-tenant credential handed to the remote platform for eventing.
///
/// Held in memory only while a deploy request is being built. Never
/// persisted and never logged.
pub struct EventingCredential {
    /// Name of the managed account backing this credential.
    pub name: String,
    /// Client identifier.
    pub client_id: String,
    /// Client secret.
    pub client_secret: SecretString,
}

impl Clone for EventingCredential {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            client_id: self.client_id.clone(),
            client_secret: SecretString::from(self.client_secret.expose_secret().to_owned()),
        }
    }
}

impl fmt::Debug for EventingCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventingCredential")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Eventing configuration for a decision version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventingConfig {
    /// Topic the deployed decision consumes from.
    pub inbound_topic: String,
    /// Topic the deployed decision publishes to.
    pub outbound_topic: String,
    /// Transient credential, attached at deploy time. Never persisted.
    #[serde(skip)]
    pub credential: Option<EventingCredential>,
}

/// One immutable submitted revision of a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionVersion {
    /// Unique version identifier.
    pub id: String,
    /// Owning decision.
    pub decision_id: DecisionId,
    /// Version number, monotonic per (tenant, name) starting at 1.
    pub version: u64,
    /// Current lifecycle status.
    pub status: VersionStatus,
    /// When the version was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When the version was last promoted to current.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Stored artifact location and content hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    /// Remote deployment descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
    /// Eventing configuration, if the version declares eventing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eventing: Option<EventingConfig>,
}

impl DecisionVersion {
    /// Create a new version in the building state.
    #[must_use]
    pub fn new(decision_id: DecisionId, version: u64, eventing: Option<EventingConfig>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            decision_id,
            version,
            status: VersionStatus::Building,
            submitted_at: Utc::now(),
            published_at: None,
            artifact: None,
            deployment: None,
            eventing,
        }
    }
}

/// A tenant-owned named artifact whose content evolves through versions.
///
/// The aggregate is the unit of consistency: all mutations go through an
/// optimistic-lock mediated read-modify-write on `revision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision identifier.
    pub id: DecisionId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Decision name, unique per tenant.
    pub name: String,
    /// Version number of the current version, set once any version exists.
    pub current_version: Option<u64>,
    /// Version number of the version under an active lifecycle operation.
    /// `Some` iff an operation is in flight; that version is always BUILDING.
    pub next_version: Option<u64>,
    /// All versions, in submission order.
    pub versions: Vec<DecisionVersion>,
    /// Optimistic lock counter, incremented on every committed update.
    pub revision: u64,
    /// When the decision was created.
    pub created_at: DateTime<Utc>,
    /// When the decision was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Decision {
    /// Create a new decision with no versions.
    #[must_use]
    pub fn new(tenant: TenantId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DecisionId::generate(),
            tenant,
            name: name.into(),
            current_version: None,
            next_version: None,
            versions: Vec::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a version by number.
    #[must_use]
    pub fn version(&self, number: u64) -> Option<&DecisionVersion> {
        self.versions.iter().find(|v| v.version == number)
    }

    /// Look up a version by number, mutably.
    pub fn version_mut(&mut self, number: u64) -> Option<&mut DecisionVersion> {
        self.versions.iter_mut().find(|v| v.version == number)
    }

    /// The current version, if any version exists.
    #[must_use]
    pub fn current(&self) -> Option<&DecisionVersion> {
        self.current_version.and_then(|n| self.version(n))
    }

    /// The version under an active lifecycle operation, if any.
    #[must_use]
    pub fn next(&self) -> Option<&DecisionVersion> {
        self.next_version.and_then(|n| self.version(n))
    }

    /// Highest version number assigned so far.
    #[must_use]
    pub fn max_version(&self) -> u64 {
        self.versions.iter().map(|v| v.version).max().unwrap_or(0)
    }
}

/// A tenant-registered URL notified of lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    /// Unique webhook identifier.
    pub id: WebhookId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Target URL, unique per tenant.
    pub url: String,
    /// When the webhook was registered.
    pub created_at: DateTime<Utc>,
}

impl Webhook {
    /// Create a new webhook registration.
    #[must_use]
    pub fn new(tenant: TenantId, url: impl Into<String>) -> Self {
        Self {
            id: WebhookId::generate(),
            tenant,
            url: url.into(),
            created_at: Utc::now(),
        }
    }
}

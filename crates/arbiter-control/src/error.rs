//! Error types for arbiter-control.

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Artifact storage error.
    #[error("artifact storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Invalid lifecycle transition attempted.
    #[error("invalid lifecycle transition: cannot transition from {from} to {to}")]
    InvalidTransition {
        /// Current status of the version.
        from: &'static str,
        /// Attempted target status.
        to: &'static str,
    },

    /// A lifecycle operation is already in flight for the decision.
    #[error("decision {decision} already has version {version} building")]
    OperationInFlight {
        /// Decision name or id.
        decision: String,
        /// The version currently building.
        version: u64,
    },

    /// A completion callback did not match the in-flight version.
    #[error("callback for version {received} does not match in-flight version {expected:?}")]
    VersionMismatch {
        /// The version currently marked as next, if any.
        expected: Option<u64>,
        /// The version the callback referred to.
        received: u64,
    },

    /// Optimistic lock lost: another writer committed first.
    #[error("decision {decision} was modified concurrently")]
    ConcurrentModification {
        /// Decision name or id.
        decision: String,
    },

    /// Decision not found.
    #[error("decision not found: {0}")]
    DecisionNotFound(String),

    /// Decision version not found.
    #[error("version {version} of decision {decision} not found")]
    VersionNotFound {
        /// Decision name or id.
        decision: String,
        /// The missing version number.
        version: u64,
    },

    /// A decision with this name already exists for the tenant.
    #[error("decision {name} already exists for tenant {tenant}")]
    DecisionExists {
        /// Tenant identifier.
        tenant: String,
        /// Decision name.
        name: String,
    },

    /// Webhook not found.
    #[error("webhook not found: {0}")]
    WebhookNotFound(String),

    /// A webhook with this URL is already registered for the tenant.
    #[error("webhook {url} already registered for tenant {tenant}")]
    WebhookExists {
        /// Tenant identifier.
        tenant: String,
        /// Webhook target URL.
        url: String,
    },

    /// The deploy request itself failed. Always paired with a compensating
    /// FAILED transition before surfacing.
    #[error("deploy request failed for {tenant}/{decision} version {version}: {source_message}")]
    DeploymentDispatch {
        /// Tenant identifier.
        tenant: String,
        /// Decision name or id.
        decision: String,
        /// The version whose deploy request failed.
        version: u64,
        /// The underlying failure.
        source_message: String,
    },

    /// Credential vault or account provisioning failure. Surfaces without
    /// a deploy call ever being issued.
    #[error("provisioning error: {0}")]
    Provisioning(String),

    /// Remote platform rejected a request.
    #[error("platform error: {0}")]
    Platform(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Invalid request input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a provisioning error.
    #[must_use]
    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    /// Create a platform error.
    #[must_use]
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is a client-fault lifecycle violation rather
    /// than an infrastructure failure.
    #[must_use]
    pub const fn is_lifecycle_fault(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::OperationInFlight { .. }
                | Self::VersionMismatch { .. }
                | Self::ConcurrentModification { .. }
                | Self::DecisionExists { .. }
                | Self::WebhookExists { .. }
        )
    }
}

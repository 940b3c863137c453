//! HTTP API for the control plane.
//!
//! Provides endpoints for:
//! - Decision lifecycle (submit, query, promote, delete)
//! - Remote-platform completion callbacks
//! - Webhook registration
//! - Health and readiness checks
//! - Prometheus metrics

mod callbacks;
mod decisions;
mod webhooks;

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::error::ControlError;
use crate::orchestrator::DeploymentOrchestrator;
use crate::store::DecisionStore;
use crate::types::VersionStatus;
use crate::webhooks::WebhookService;

pub use callbacks::CallbackRequest;
pub use decisions::{CreateDecisionRequest, DecisionResponse, ListDecisionsQuery};
pub use webhooks::RegisterWebhookRequest;

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator for lifecycle commands.
    pub orchestrator: Arc<DeploymentOrchestrator>,
    /// Decision store for direct queries.
    pub store: Arc<dyn DecisionStore>,
    /// Webhook registration service.
    pub webhooks: Arc<WebhookService>,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Decision lifecycle
        .route("/tenants/{tenant}/decisions", post(decisions::create_decision))
        .route("/tenants/{tenant}/decisions", get(decisions::list_decisions))
        .route(
            "/tenants/{tenant}/decisions/building",
            get(decisions::list_building),
        )
        .route(
            "/tenants/{tenant}/decisions/{lookup}",
            get(decisions::get_decision),
        )
        .route(
            "/tenants/{tenant}/decisions/{lookup}",
            delete(decisions::delete_decision),
        )
        .route(
            "/tenants/{tenant}/decisions/{lookup}/versions",
            get(decisions::list_versions),
        )
        .route(
            "/tenants/{tenant}/decisions/{lookup}/versions/{version}",
            delete(decisions::delete_version),
        )
        .route(
            "/tenants/{tenant}/decisions/{lookup}/versions/{version}/promote",
            post(decisions::promote_version),
        )
        // Remote platform callbacks
        .route(
            "/callback/decisions/{id}/versions/{version}",
            post(callbacks::deployment_completed),
        )
        // Webhooks
        .route("/tenants/{tenant}/webhooks", post(webhooks::register_webhook))
        .route("/tenants/{tenant}/webhooks", get(webhooks::list_webhooks))
        .route(
            "/tenants/{tenant}/webhooks/{lookup}",
            delete(webhooks::unregister_webhook),
        )
        // Metrics
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Error response.
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Map a control error to the HTTP status the caller should see.
pub(crate) fn error_to_status(error: &ControlError) -> axum::http::StatusCode {
    use axum::http::StatusCode;

    if error.is_lifecycle_fault() {
        return StatusCode::CONFLICT;
    }

    match error {
        ControlError::DecisionNotFound(_)
        | ControlError::VersionNotFound { .. }
        | ControlError::WebhookNotFound(_) => StatusCode::NOT_FOUND,
        ControlError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        // Dispatch errors have already been compensated; provisioning and
        // storage errors are infrastructure faults.
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(
    error: &ControlError,
) -> (axum::http::StatusCode, axum::Json<ErrorResponse>) {
    (
        error_to_status(error),
        axum::Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// Health check endpoint.
async fn health_check() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse { status: "healthy" })
}

/// Readiness check endpoint.
async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> (axum::http::StatusCode, axum::Json<ReadyResponse>) {
    match state.store.count_versions_by_status().await {
        Ok(counts) => (
            axum::http::StatusCode::OK,
            axum::Json(ReadyResponse {
                ready: true,
                building_versions: counts
                    .get(&VersionStatus::Building)
                    .copied()
                    .unwrap_or(0),
            }),
        ),
        Err(_) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(ReadyResponse {
                ready: false,
                building_versions: 0,
            }),
        ),
    }
}

/// Metrics endpoint.
async fn metrics(axum::extract::State(state): axum::extract::State<AppState>) -> String {
    let mut output = String::new();

    output.push_str("# HELP control_decision_versions_total Number of decision versions by status\n");
    output.push_str("# TYPE control_decision_versions_total gauge\n");

    let counts = state.store.count_versions_by_status().await.unwrap_or_default();
    for status in [
        VersionStatus::Building,
        VersionStatus::Ready,
        VersionStatus::Current,
        VersionStatus::Failed,
        VersionStatus::Deleted,
    ] {
        let count = counts.get(&status).copied().unwrap_or(0);
        let _ = writeln!(
            output,
            "control_decision_versions_total{{status=\"{status}\"}} {count}"
        );
    }

    output.push_str("# HELP control_webhook_deliveries_total Webhook delivery outcomes by URL\n");
    output.push_str("# TYPE control_webhook_deliveries_total counter\n");

    if let Ok(stats) = state.webhooks.pool().stats() {
        for (url, counters) in stats {
            let _ = writeln!(
                output,
                "control_webhook_deliveries_total{{url=\"{url}\",outcome=\"success\"}} {}",
                counters.successes
            );
            let _ = writeln!(
                output,
                "control_webhook_deliveries_total{{url=\"{url}\",outcome=\"failure\"}} {}",
                counters.failures
            );
        }
    }

    output
}

/// Health response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness response.
#[derive(serde::Serialize)]
struct ReadyResponse {
    ready: bool,
    building_versions: u64,
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use crate::artifacts::ArtifactStorage;
    use crate::clients::{MemoryVault, MockAccountProvisioner, MockDeployClient};
    use crate::config::{FleetConfig, WebhookConfig};
    use crate::events::EventBus;
    use crate::fleet::StaticFleetSelector;
    use crate::lifecycle::LifecycleManager;
    use crate::store::MemoryStore;
    use crate::webhooks::DeliveryPool;

    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::new());
    let lifecycle = Arc::new(LifecycleManager::new(
        store.clone(),
        Arc::new(ArtifactStorage::in_memory()),
    ));

    let orchestrator = Arc::new(DeploymentOrchestrator::new(
        lifecycle,
        Arc::new(MockDeployClient::new()),
        Arc::new(StaticFleetSelector::new(&FleetConfig::default())),
        Arc::new(MemoryVault::new()),
        Arc::new(MockAccountProvisioner::new()),
        bus.clone(),
        "http://localhost:8084",
    ));

    let webhooks = Arc::new(WebhookService::new(
        store.clone(),
        bus,
        DeliveryPool::new(&WebhookConfig::default()).expect("delivery pool"),
    ));

    AppState {
        orchestrator,
        store,
        webhooks,
    }
}

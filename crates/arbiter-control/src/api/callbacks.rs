//! Completion callbacks from the remote platform.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{DecisionId, Deployment};

use super::{error_response, AppState, ErrorResponse};

/// Completion callback payload.
///
/// `phase` says how the deployment ended; the rest is the remote-assigned
/// deployment descriptor.
#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    /// "deployed" or "failed".
    pub phase: String,
    /// Target namespace on the remote platform.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Remote resource name.
    #[serde(default)]
    pub resource_name: Option<String>,
    /// Remote version-resource identifier.
    #[serde(default)]
    pub version_resource_id: Option<String>,
    /// URL addressing this specific version.
    #[serde(default)]
    pub version_url: Option<String>,
    /// URL addressing whatever version is current.
    #[serde(default)]
    pub current_url: Option<String>,
    /// Human-readable status message.
    #[serde(default)]
    pub message: Option<String>,
}

/// Response for a completion callback.
#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    /// Whether the callback was applied.
    pub accepted: bool,
    /// Resulting version status.
    pub status: String,
}

/// Handle a completion callback for a version.
///
/// Duplicate or stale callbacks fail the version-match check in the
/// lifecycle layer and surface as a conflict.
pub async fn deployment_completed(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, u64)>,
    Json(request): Json<CallbackRequest>,
) -> Result<Json<CallbackResponse>, (StatusCode, Json<ErrorResponse>)> {
    let id = DecisionId::new(id);

    info!(
        decision = %id,
        version,
        phase = %request.phase,
        "received deployment completion callback"
    );

    let deployment = Deployment {
        namespace: request.namespace,
        resource_name: request.resource_name,
        version_resource_id: request.version_resource_id,
        version_url: request.version_url,
        current_url: request.current_url,
        status_message: request.message,
    };

    let result = match request.phase.as_str() {
        "deployed" => state.orchestrator.handle_deployed(&id, version, deployment).await,
        "failed" => state.orchestrator.handle_failed(&id, version, deployment).await,
        phase => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("unknown callback phase: {phase}"),
                }),
            ));
        }
    };

    match result {
        Ok(decision) => {
            let status = decision
                .version(version)
                .map_or_else(|| "unknown".to_owned(), |v| v.status.to_string());
            Ok(Json(CallbackResponse {
                accepted: true,
                status,
            }))
        }
        Err(e) => Err(error_response(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{router, test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn create_decision(state: &super::AppState) -> String {
        let body = serde_json::json!({
            "name": "approval",
            "definition": {"rules": []},
        });

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tenants/acme/decisions")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        json["id"].as_str().unwrap().to_owned()
    }

    async fn post_callback(
        state: &super::AppState,
        id: &str,
        version: u64,
        phase: &str,
    ) -> axum::response::Response {
        let body = serde_json::json!({
            "phase": phase,
            "namespace": "decisions",
            "resource_name": "approval",
            "version_url": "https://platform.example.com/decisions/approval/1",
        });

        router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/callback/decisions/{id}/versions/{version}"))
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn deployed_callback_makes_version_current() {
        let state = test_state();
        let id = create_decision(&state).await;

        let response = post_callback(&state, &id, 1, "deployed").await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["accepted"], true);
        assert_eq!(json["status"], "current");
    }

    #[tokio::test]
    async fn failed_callback_marks_version_failed() {
        let state = test_state();
        let id = create_decision(&state).await;

        let response = post_callback(&state, &id, 1, "failed").await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "failed");
    }

    #[tokio::test]
    async fn duplicate_callback_conflicts() {
        let state = test_state();
        let id = create_decision(&state).await;

        post_callback(&state, &id, 1, "deployed").await;
        let response = post_callback(&state, &id, 1, "deployed").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_phase_is_bad_request() {
        let state = test_state();
        let id = create_decision(&state).await;

        let response = post_callback(&state, &id, 1, "exploded").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_decision_is_not_found() {
        let state = test_state();

        let response = post_callback(&state, "missing", 1, "deployed").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

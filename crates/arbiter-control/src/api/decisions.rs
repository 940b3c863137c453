//! Decision lifecycle endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::lifecycle::CreateVersionRequest;
use crate::store::Page;
use crate::types::{ArtifactRef, Decision, Deployment, EventingConfig, TenantId};

use super::{error_response, AppState, ErrorResponse};

/// Request to submit a new decision version.
#[derive(Debug, Deserialize)]
pub struct CreateDecisionRequest {
    /// Decision name, unique per tenant.
    pub name: String,
    /// The decision definition.
    pub definition: serde_json::Value,
    /// Eventing topics, if the version declares eventing.
    #[serde(default)]
    pub eventing: Option<EventingRequest>,
}

/// Eventing block of a submission.
#[derive(Debug, Deserialize)]
pub struct EventingRequest {
    /// Topic the deployed decision consumes from.
    pub inbound_topic: String,
    /// Topic the deployed decision publishes to.
    pub outbound_topic: String,
}

/// Query parameters for listing decisions.
#[derive(Debug, Default, Deserialize)]
pub struct ListDecisionsQuery {
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

/// Response for a decision version.
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    /// Version number.
    pub version: u64,
    /// Lifecycle status.
    pub status: String,
    /// Submission timestamp.
    pub submitted_at: String,
    /// Promotion timestamp (set when the version became current).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    /// Stored artifact location and hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    /// Remote deployment descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
    /// Eventing configuration (credential never included).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eventing: Option<EventingConfig>,
}

/// Response for a decision.
#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    /// Decision ID.
    pub id: String,
    /// Owning tenant.
    pub tenant: String,
    /// Decision name.
    pub name: String,
    /// Current version number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<u64>,
    /// In-flight version number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_version: Option<u64>,
    /// All versions, in submission order.
    pub versions: Vec<VersionResponse>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

pub(crate) fn decision_to_response(decision: Decision) -> DecisionResponse {
    DecisionResponse {
        id: decision.id.to_string(),
        tenant: decision.tenant.to_string(),
        name: decision.name,
        current_version: decision.current_version,
        next_version: decision.next_version,
        versions: decision
            .versions
            .into_iter()
            .map(|v| VersionResponse {
                version: v.version,
                status: v.status.to_string(),
                submitted_at: v.submitted_at.to_rfc3339(),
                published_at: v.published_at.map(|t| t.to_rfc3339()),
                artifact: v.artifact,
                deployment: v.deployment,
                eventing: v.eventing,
            })
            .collect(),
        created_at: decision.created_at.to_rfc3339(),
        updated_at: decision.updated_at.to_rfc3339(),
    }
}

/// Submit a new version, creating the decision on first submission.
pub async fn create_decision(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(request): Json<CreateDecisionRequest>,
) -> Result<(StatusCode, Json<DecisionResponse>), (StatusCode, Json<ErrorResponse>)> {
    let tenant = TenantId::new(tenant);

    info!(tenant = %tenant, decision = %request.name, "submitting decision version via API");

    let create = CreateVersionRequest {
        name: request.name,
        definition: request.definition,
        eventing: request.eventing.map(|e| EventingConfig {
            inbound_topic: e.inbound_topic,
            outbound_topic: e.outbound_topic,
            credential: None,
        }),
    };

    match state.orchestrator.create_or_update(&tenant, create).await {
        Ok(decision) => Ok((StatusCode::ACCEPTED, Json(decision_to_response(decision)))),
        Err(e) => Err(error_response(&e)),
    }
}

/// List a tenant's decisions with a current version, paged.
pub async fn list_decisions(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<ListDecisionsQuery>,
) -> Result<Json<Vec<DecisionResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let tenant = TenantId::new(tenant);
    let page = Page {
        limit: query.limit,
        offset: query.offset,
    };

    match state.orchestrator.lifecycle().list_current(&tenant, page).await {
        Ok(decisions) => Ok(Json(
            decisions.into_iter().map(decision_to_response).collect(),
        )),
        Err(e) => Err(error_response(&e)),
    }
}

/// List a tenant's decisions with a version currently building.
pub async fn list_building(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<Vec<DecisionResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let tenant = TenantId::new(tenant);

    match state.orchestrator.lifecycle().list_building(&tenant).await {
        Ok(decisions) => Ok(Json(
            decisions.into_iter().map(decision_to_response).collect(),
        )),
        Err(e) => Err(error_response(&e)),
    }
}

/// Get a decision by id or name.
pub async fn get_decision(
    State(state): State<AppState>,
    Path((tenant, lookup)): Path<(String, String)>,
) -> Result<Json<DecisionResponse>, (StatusCode, Json<ErrorResponse>)> {
    let tenant = TenantId::new(tenant);

    match state.orchestrator.lifecycle().get(&tenant, &lookup).await {
        Ok(decision) => Ok(Json(decision_to_response(decision))),
        Err(e) => Err(error_response(&e)),
    }
}

/// List a decision's full version history.
pub async fn list_versions(
    State(state): State<AppState>,
    Path((tenant, lookup)): Path<(String, String)>,
) -> Result<Json<Vec<VersionResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let tenant = TenantId::new(tenant);

    match state.orchestrator.lifecycle().get(&tenant, &lookup).await {
        Ok(decision) => Ok(Json(decision_to_response(decision).versions)),
        Err(e) => Err(error_response(&e)),
    }
}

/// Promote a READY version back to current via a fresh deployment.
pub async fn promote_version(
    State(state): State<AppState>,
    Path((tenant, lookup, version)): Path<(String, String, u64)>,
) -> Result<(StatusCode, Json<DecisionResponse>), (StatusCode, Json<ErrorResponse>)> {
    let tenant = TenantId::new(tenant);

    info!(tenant = %tenant, decision = %lookup, version, "promoting version via API");

    match state.orchestrator.promote(&tenant, &lookup, version).await {
        Ok(decision) => Ok((StatusCode::ACCEPTED, Json(decision_to_response(decision)))),
        Err(e) => Err(error_response(&e)),
    }
}

/// Logically delete a version.
pub async fn delete_version(
    State(state): State<AppState>,
    Path((tenant, lookup, version)): Path<(String, String, u64)>,
) -> Result<Json<DecisionResponse>, (StatusCode, Json<ErrorResponse>)> {
    let tenant = TenantId::new(tenant);

    match state
        .orchestrator
        .delete_version(&tenant, &lookup, version)
        .await
    {
        Ok(decision) => Ok(Json(decision_to_response(decision))),
        Err(e) => Err(error_response(&e)),
    }
}

/// Hard-delete a decision.
pub async fn delete_decision(
    State(state): State<AppState>,
    Path((tenant, lookup)): Path<(String, String)>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let tenant = TenantId::new(tenant);

    match state.orchestrator.delete_decision(&tenant, &lookup).await {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(error_response(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{router, test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn create_body(name: &str) -> Body {
        let body = serde_json::json!({
            "name": name,
            "definition": {"rules": []},
        });
        Body::from(serde_json::to_vec(&body).unwrap())
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_decision_is_accepted() {
        let app = router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tenants/acme/decisions")
                    .header("content-type", "application/json")
                    .body(create_body("approval"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = response_json(response).await;
        assert_eq!(json["name"], "approval");
        assert_eq!(json["next_version"], 1);
        assert_eq!(json["versions"][0]["status"], "building");
    }

    #[tokio::test]
    async fn second_submission_while_building_conflicts() {
        let state = test_state();

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tenants/acme/decisions")
                    .header("content-type", "application/json")
                    .body(create_body("approval"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tenants/acme/decisions")
                    .header("content-type", "application/json")
                    .body(create_body("approval"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_decision_is_not_found() {
        let app = router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/tenants/acme/decisions/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn building_listing_shows_in_flight_decisions() {
        let state = test_state();

        router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tenants/acme/decisions")
                    .header("content-type", "application/json")
                    .body(create_body("approval"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/tenants/acme/decisions/building")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["name"], "approval");
    }

    #[tokio::test]
    async fn delete_decision_returns_no_content() {
        let state = test_state();

        router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tenants/acme/decisions")
                    .header("content-type", "application/json")
                    .body(create_body("approval"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/tenants/acme/decisions/approval")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn delete_building_version_conflicts() {
        let state = test_state();

        router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tenants/acme/decisions")
                    .header("content-type", "application/json")
                    .body(create_body("approval"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/tenants/acme/decisions/approval/versions/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}

//! Webhook registration endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::types::{TenantId, Webhook};

use super::{error_response, AppState, ErrorResponse};

/// Request to register a webhook.
#[derive(Debug, Deserialize)]
pub struct RegisterWebhookRequest {
    /// Target URL to deliver lifecycle events to.
    pub url: String,
}

/// Response for a webhook registration.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Webhook ID.
    pub id: String,
    /// Owning tenant.
    pub tenant: String,
    /// Target URL.
    pub url: String,
    /// Registration timestamp.
    pub created_at: String,
}

fn webhook_to_response(webhook: Webhook) -> WebhookResponse {
    WebhookResponse {
        id: webhook.id.to_string(),
        tenant: webhook.tenant.to_string(),
        url: webhook.url,
        created_at: webhook.created_at.to_rfc3339(),
    }
}

/// Register a webhook for a tenant.
pub async fn register_webhook(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(request): Json<RegisterWebhookRequest>,
) -> Result<(StatusCode, Json<WebhookResponse>), (StatusCode, Json<ErrorResponse>)> {
    let tenant = TenantId::new(tenant);

    match state.webhooks.register(&tenant, &request.url).await {
        Ok(webhook) => Ok((StatusCode::CREATED, Json(webhook_to_response(webhook)))),
        Err(e) => Err(error_response(&e)),
    }
}

/// List a tenant's webhooks.
pub async fn list_webhooks(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<Vec<WebhookResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let tenant = TenantId::new(tenant);

    match state.webhooks.list(&tenant).await {
        Ok(webhooks) => Ok(Json(
            webhooks.into_iter().map(webhook_to_response).collect(),
        )),
        Err(e) => Err(error_response(&e)),
    }
}

/// Unregister a webhook by id or literal URL.
pub async fn unregister_webhook(
    State(state): State<AppState>,
    Path((tenant, lookup)): Path<(String, String)>,
) -> Result<Json<Vec<WebhookResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let tenant = TenantId::new(tenant);

    match state.webhooks.unregister(&tenant, &lookup).await {
        Ok(removed) => Ok(Json(
            removed.into_iter().map(webhook_to_response).collect(),
        )),
        Err(e) => Err(error_response(&e)),
    }
}

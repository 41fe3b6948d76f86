//! Server notification webhook handler.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use crate::services::{status_for, WebhookError};
use crate::state::AppState;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the notification was accepted.
    pub received: bool,
}

/// Handle App Store server notifications.
///
/// Returns `200` once the notification is processed (or is a no-op), `401`
/// when the signature does not verify and `500` when processing failed and
/// the platform should redeliver.
pub async fn app_store_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    let result = state.webhooks.process(&body).await;
    let status = status_for(&result);

    if let Err(WebhookError::SignatureInvalid(err)) = &result {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string()
        };
        tracing::warn!(
            reason = %err,
            remote_addr = %header("x-forwarded-for"),
            user_agent = %header("user-agent"),
            body_bytes = body.len(),
            "Rejected webhook with invalid signature"
        );
    }

    (
        status,
        Json(WebhookResponse {
            received: status == StatusCode::OK,
        }),
    )
}

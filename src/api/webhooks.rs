use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

use crate::gateway::types::OrderStatus;
use crate::services::reconciler::{PaymentReconciler, WebhookOutcome};

#[derive(Clone)]
pub struct WebhookState {
    pub reconciler: Arc<PaymentReconciler>,
}

/// POST /api/payment/webhook
///
/// Gateway-pushed status reports. Signature headers are verified when a
/// webhook secret is configured. Payment-level processing failures are still
/// acknowledged with 200 so the gateway does not redeliver a report we can
/// never act on; only an invalid signature is rejected.
pub async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: axum::http::HeaderMap,
    body: String,
) -> impl IntoResponse {
    info!("Received payment webhook");

    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let timestamp = headers
        .get("x-webhook-timestamp")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let verification =
        state
            .reconciler
            .verify_webhook_signature(body.as_bytes(), timestamp, signature);
    if !verification.valid {
        warn!(
            reason = verification.reason.as_deref().unwrap_or("unknown"),
            "Invalid webhook signature"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"success": false, "message": "Invalid signature"})),
        );
    }

    let payload: JsonValue = match serde_json::from_str(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Invalid webhook JSON payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"success": false, "message": "Invalid JSON"})),
            );
        }
    };

    let (order_id, reported_status) = match extract_order_fields(&payload) {
        Some(fields) => fields,
        None => {
            warn!("Webhook payload missing order_id/order_status");
            return (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": false,
                    "message": "Missing order_id or order_status"
                })),
            );
        }
    };

    let reported = OrderStatus::from_gateway_str(&reported_status);
    match state.reconciler.handle_webhook(&order_id, reported).await {
        Ok(WebhookOutcome::CreditsApplied { .. }) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "Payment verified and credits added"
            })),
        ),
        Ok(WebhookOutcome::AlreadyCompleted) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "Payment already processed"
            })),
        ),
        Ok(WebhookOutcome::MarkedFailed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "Payment marked as failed"
            })),
        ),
        Ok(WebhookOutcome::Ignored) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "Webhook acknowledged"
            })),
        ),
        Err(e) if e.is_service_error() => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "success": false,
                "message": e.user_message()
            })),
        ),
        Err(e) => {
            warn!(order_id = %order_id, error = %e, "Webhook processing failed");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": false,
                    "message": e.user_message()
                })),
            )
        }
    }
}

/// Pull `order_id`/`order_status` out of a webhook payload. Deliveries come
/// either flat or nested under `data.order` (with the payment status under
/// `data.payment.payment_status`).
fn extract_order_fields(payload: &JsonValue) -> Option<(String, String)> {
    let order = payload
        .get("data")
        .and_then(|d| d.get("order"))
        .unwrap_or(payload);

    let order_id = order.get("order_id").and_then(|v| v.as_str())?;
    let status = order
        .get("order_status")
        .and_then(|v| v.as_str())
        .or_else(|| {
            payload
                .get("data")
                .and_then(|d| d.get("payment"))
                .and_then(|p| p.get("payment_status"))
                .and_then(|v| v.as_str())
        })?;

    Some((order_id.to_string(), status.to_string()))
}

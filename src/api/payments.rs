use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::services::reconciler::{
    CreatePaymentIntent, ManualPaymentDetails, PaymentIntent, PaymentReconciler, ReconcilerError,
    StatusOutcome,
};

#[derive(Clone)]
pub struct PaymentApiState {
    pub reconciler: Arc<PaymentReconciler>,
}

/// Amounts arrive as JSON numbers from the web client and as strings from
/// everything else; accept both.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountField {
    Number(f64),
    Text(String),
}

impl AmountField {
    fn into_string(self) -> String {
        match self {
            AmountField::Number(n) => n.to_string(),
            AmountField::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub user_id: Uuid,
    pub plan_id: String,
    pub credits: i64,
    pub amount: AmountField,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_payment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_details: Option<ManualPaymentDetails>,
    pub message: String,
}

impl CreatePaymentResponse {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            payment_session_id: None,
            order_id: None,
            payment_link: None,
            manual_payment: None,
            payment_details: None,
            message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentStatusRequest {
    pub order_id: String,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ManualVerificationRequest {
    pub order_id: String,
    pub transaction_id: Option<String>,
    pub user_id: Uuid,
    pub credits: i64,
}

#[derive(Debug, Serialize)]
pub struct ManualVerificationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<i64>,
    pub message: String,
}

/// Payment-level outcomes answer 200 with a success flag; only store
/// unavailability is a service-level 503.
fn error_status(err: &ReconcilerError) -> StatusCode {
    if err.is_service_error() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// POST /api/payment/create
pub async fn create_payment_link(
    State(state): State<Arc<PaymentApiState>>,
    Json(payload): Json<CreatePaymentRequest>,
) -> impl IntoResponse {
    let input = CreatePaymentIntent {
        user_id: payload.user_id,
        plan_id: payload.plan_id,
        credits: payload.credits,
        amount: payload.amount.into_string(),
    };

    match state.reconciler.create_payment_intent(input).await {
        Ok(PaymentIntent::Checkout(session)) => (
            StatusCode::OK,
            Json(CreatePaymentResponse {
                success: true,
                payment_session_id: Some(session.session_id),
                order_id: Some(session.request_id),
                payment_link: session.payment_link,
                manual_payment: None,
                payment_details: None,
                message: "Payment link created successfully".to_string(),
            }),
        ),
        Ok(PaymentIntent::Manual(details)) => (
            StatusCode::OK,
            Json(CreatePaymentResponse {
                success: true,
                payment_session_id: None,
                order_id: Some(details.order_id.clone()),
                payment_link: None,
                manual_payment: Some(true),
                payment_details: Some(details),
                message: "Payment gateway not configured. Manual payment option available."
                    .to_string(),
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(CreatePaymentResponse::failure(e.user_message())),
        ),
    }
}

/// POST /api/payment/status, the client-side poll after the checkout redirect.
pub async fn check_payment_status(
    State(state): State<Arc<PaymentApiState>>,
    Json(payload): Json<PaymentStatusRequest>,
) -> impl IntoResponse {
    match state
        .reconciler
        .check_status(&payload.order_id, payload.user_id)
        .await
    {
        Ok(StatusOutcome::Completed {
            balance,
            newly_settled,
        }) => (
            StatusCode::OK,
            Json(PaymentStatusResponse {
                success: true,
                credits: Some(balance),
                status: Some("completed".to_string()),
                message: if newly_settled {
                    "Payment successful".to_string()
                } else {
                    "Payment already processed".to_string()
                },
            }),
        ),
        Ok(StatusOutcome::Pending) => (
            StatusCode::OK,
            Json(PaymentStatusResponse {
                success: false,
                credits: None,
                status: Some("pending".to_string()),
                message: "Payment not completed".to_string(),
            }),
        ),
        Ok(StatusOutcome::Failed) => (
            StatusCode::OK,
            Json(PaymentStatusResponse {
                success: false,
                credits: None,
                status: Some("failed".to_string()),
                message: "Payment failed".to_string(),
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(PaymentStatusResponse {
                success: false,
                credits: None,
                status: None,
                message: e.user_message(),
            }),
        ),
    }
}

/// POST /api/payment/verify-manual, the support/admin confirmation for
/// gateway-less payments.
pub async fn verify_manual_payment(
    State(state): State<Arc<PaymentApiState>>,
    Json(payload): Json<ManualVerificationRequest>,
) -> impl IntoResponse {
    match state
        .reconciler
        .verify_manual_payment(
            &payload.order_id,
            payload.user_id,
            payload.credits,
            payload.transaction_id.as_deref(),
        )
        .await
    {
        Ok(balance) => (
            StatusCode::OK,
            Json(ManualVerificationResponse {
                success: true,
                credits: Some(balance),
                message: "Payment verified and credits added".to_string(),
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(ManualVerificationResponse {
                success: false,
                credits: None,
                message: e.user_message(),
            }),
        ),
    }
}

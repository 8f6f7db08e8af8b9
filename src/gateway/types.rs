use crate::gateway::error::GatewayError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Order status as reported by the gateway, normalized at the adapter
/// boundary so callers never branch on raw wire strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Paid,
    Pending,
    Failed,
    /// The gateway could not be reached or returned something unrecognized.
    /// Callers fall back to locally stored state.
    Unknown,
}

impl OrderStatus {
    /// Map Cashfree's `order_status` strings. `ACTIVE` means the order is
    /// open and awaiting payment.
    pub fn from_gateway_str(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "PAID" | "SUCCESS" => OrderStatus::Paid,
            "ACTIVE" | "PENDING" => OrderStatus::Pending,
            "EXPIRED" | "TERMINATED" | "TERMINATION_REQUESTED" | "FAILED" | "CANCELLED"
            | "USER_DROPPED" => OrderStatus::Failed,
            _ => OrderStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Paid => "paid",
            OrderStatus::Pending => "pending",
            OrderStatus::Failed => "failed",
            OrderStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Customer identity forwarded to the gateway when creating an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub customer_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Redirect and webhook URLs registered with the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackUrls {
    pub return_url: String,
    pub notify_url: String,
}

/// A request to open a checkout order with the gateway.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub request_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub customer: CustomerDetails,
    pub callbacks: CallbackUrls,
}

impl OrderRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.request_id.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "request_id is required".to_string(),
                field: Some("request_id".to_string()),
            });
        }
        if self.amount <= BigDecimal::from(0) {
            return Err(GatewayError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }
}

/// Parse an amount string into a positive decimal.
pub fn parse_positive_amount(value: &str, field: &str) -> Result<BigDecimal, GatewayError> {
    let parsed = BigDecimal::from_str(value.trim()).map_err(|_| GatewayError::ValidationError {
        message: format!("invalid decimal amount: {}", value),
        field: Some(field.to_string()),
    })?;
    if parsed <= BigDecimal::from(0) {
        return Err(GatewayError::ValidationError {
            message: "amount must be greater than zero".to_string(),
            field: Some(field.to_string()),
        });
    }
    Ok(parsed)
}

/// A live checkout session created with the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub request_id: String,
    pub session_id: String,
    pub payment_link: Option<String>,
}

/// Webhook signature verification result.
#[derive(Debug, Clone)]
pub struct WebhookVerification {
    pub valid: bool,
    pub reason: Option<String>,
}

use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::http::{verify_hmac_sha256_base64, GatewayHttpClient};
use crate::gateway::provider::PaymentGateway;
use crate::gateway::types::{CheckoutSession, OrderRequest, OrderStatus, WebhookVerification};
use async_trait::async_trait;
use bigdecimal::ToPrimitive;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

const CASHFREE_API_VERSION: &str = "2022-09-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CashfreeEnvironment {
    Sandbox,
    Production,
}

impl CashfreeEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            CashfreeEnvironment::Sandbox => "https://sandbox.cashfree.com/pg",
            CashfreeEnvironment::Production => "https://api.cashfree.com/pg",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CashfreeConfig {
    pub app_id: String,
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub environment: CashfreeEnvironment,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl CashfreeConfig {
    /// Load gateway credentials from the environment. Returns `None` when
    /// the credentials are absent, in which case the service runs in
    /// manual-payment mode instead of refusing to start.
    pub fn from_env() -> Option<Self> {
        let app_id = std::env::var("CASHFREE_APP_ID").ok()?;
        let secret_key = std::env::var("CASHFREE_SECRET_KEY").ok()?;
        if app_id.trim().is_empty() || secret_key.trim().is_empty() {
            return None;
        }

        let environment = match std::env::var("CASHFREE_ENV")
            .or_else(|_| std::env::var("ENVIRONMENT"))
            .unwrap_or_else(|_| "sandbox".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => CashfreeEnvironment::Production,
            _ => CashfreeEnvironment::Sandbox,
        };

        Some(Self {
            app_id,
            secret_key,
            webhook_secret: std::env::var("CASHFREE_WEBHOOK_SECRET").ok(),
            environment,
            timeout_secs: std::env::var("CASHFREE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(15),
            max_retries: std::env::var("CASHFREE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
        })
    }
}

pub struct CashfreeGateway {
    config: CashfreeConfig,
    http: GatewayHttpClient,
}

impl CashfreeGateway {
    pub fn new(config: CashfreeConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.environment.base_url(), path)
    }

    fn auth_headers(&self) -> [(&str, &str); 4] {
        [
            ("x-client-id", self.config.app_id.as_str()),
            ("x-client-secret", self.config.secret_key.as_str()),
            ("x-api-version", CASHFREE_API_VERSION),
            ("Content-Type", "application/json"),
        ]
    }
}

#[async_trait]
impl PaymentGateway for CashfreeGateway {
    async fn create_order(&self, request: OrderRequest) -> GatewayResult<CheckoutSession> {
        request.validate()?;

        let order_amount =
            request
                .amount
                .to_f64()
                .ok_or_else(|| GatewayError::ValidationError {
                    message: format!("amount {} is not representable", request.amount),
                    field: Some("amount".to_string()),
                })?;

        let payload = serde_json::json!({
            "order_id": request.request_id,
            "order_amount": order_amount,
            "order_currency": request.currency,
            "customer_details": {
                "customer_id": request.customer.customer_id,
                "customer_name": request.customer.name,
                "customer_email": request.customer.email,
                "customer_phone": request.customer.phone.as_deref().unwrap_or(""),
            },
            "order_meta": {
                "return_url": request.callbacks.return_url,
                "notify_url": request.callbacks.notify_url,
            },
        });

        let raw: CashfreeOrderData = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/orders"),
                &self.auth_headers(),
                Some(&payload),
            )
            .await?;

        let session_id = raw
            .payment_session_id
            .filter(|s| !s.trim().is_empty())
            .ok_or(GatewayError::GatewayRejected {
                message: "gateway response did not include a payment session".to_string(),
                status_code: None,
            })?;

        info!(order_id = %request.request_id, "cashfree order created");

        Ok(CheckoutSession {
            request_id: request.request_id,
            session_id,
            payment_link: raw.payment_link,
        })
    }

    async fn query_order_status(&self, request_id: &str) -> OrderStatus {
        let result: GatewayResult<CashfreeOrderData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/orders/{}", request_id)),
                &self.auth_headers(),
                None,
            )
            .await;

        match result {
            Ok(data) => match data.order_status.as_deref() {
                Some(status) => OrderStatus::from_gateway_str(status),
                None => OrderStatus::Unknown,
            },
            Err(e) => {
                warn!(order_id = %request_id, error = %e, "cashfree status query failed");
                OrderStatus::Unknown
            }
        }
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        timestamp: &str,
        signature: &str,
    ) -> WebhookVerification {
        let secret = match self.config.webhook_secret.as_deref() {
            Some(secret) => secret,
            // No webhook secret configured: deliveries are accepted unsigned.
            None => {
                return WebhookVerification {
                    valid: true,
                    reason: None,
                }
            }
        };

        let valid = verify_hmac_sha256_base64(payload, timestamp, secret, signature);
        WebhookVerification {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid cashfree signature".to_string())
            },
        }
    }

    fn name(&self) -> &'static str {
        "cashfree"
    }
}

#[derive(Debug, Deserialize)]
struct CashfreeOrderData {
    #[serde(default)]
    payment_session_id: Option<String>,
    #[serde(default)]
    payment_link: Option<String>,
    #[serde(default)]
    order_status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(webhook_secret: Option<&str>) -> CashfreeGateway {
        CashfreeGateway::new(CashfreeConfig {
            app_id: "app_test".to_string(),
            secret_key: "secret_test".to_string(),
            webhook_secret: webhook_secret.map(|s| s.to_string()),
            environment: CashfreeEnvironment::Sandbox,
            timeout_secs: 5,
            max_retries: 1,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn environment_selects_base_url() {
        assert_eq!(
            CashfreeEnvironment::Sandbox.base_url(),
            "https://sandbox.cashfree.com/pg"
        );
        assert_eq!(
            CashfreeEnvironment::Production.base_url(),
            "https://api.cashfree.com/pg"
        );
    }

    #[test]
    fn webhook_signature_validation_invalid() {
        let gateway = gateway(Some("whsec_test"));
        let payload = br#"{"order_id":"order_1","order_status":"PAID"}"#;
        let result = gateway.verify_webhook(payload, "1700000000", "invalid_signature");
        assert!(!result.valid);
    }

    #[test]
    fn unsigned_webhooks_accepted_without_secret() {
        let gateway = gateway(None);
        let payload = br#"{"order_id":"order_1","order_status":"PAID"}"#;
        let result = gateway.verify_webhook(payload, "", "");
        assert!(result.valid);
    }

    #[test]
    fn order_response_parses_with_missing_fields() {
        let data: CashfreeOrderData =
            serde_json::from_str(r#"{"order_status":"ACTIVE"}"#).expect("should parse");
        assert_eq!(data.order_status.as_deref(), Some("ACTIVE"));
        assert!(data.payment_session_id.is_none());
    }
}

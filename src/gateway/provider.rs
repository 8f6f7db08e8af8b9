use crate::gateway::error::GatewayResult;
use crate::gateway::types::{CheckoutSession, OrderRequest, OrderStatus, WebhookVerification};
use async_trait::async_trait;

/// Adapter over an external payment gateway's order APIs.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a checkout order. Pure network call; no local side effects.
    async fn create_order(&self, request: OrderRequest) -> GatewayResult<CheckoutSession>;

    /// Query the current status of an order. Must not fail: an unreachable
    /// or confused gateway reports `OrderStatus::Unknown` so callers can
    /// degrade to locally stored state instead of erroring.
    async fn query_order_status(&self, request_id: &str) -> OrderStatus;

    /// Verify a webhook delivery's signature headers.
    fn verify_webhook(
        &self,
        payload: &[u8],
        timestamp: &str,
        signature: &str,
    ) -> WebhookVerification;

    fn name(&self) -> &'static str;
}

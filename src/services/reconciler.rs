use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ManualPaymentConfig;
use crate::database::error::DatabaseError;
use crate::database::payment_record_repository::{
    NewPaymentRecord, PaymentStatus, TransitionOutcome,
};
use crate::database::repository::{CreditLedger, PaymentRecordStore};
use crate::gateway::error::GatewayError;
use crate::gateway::provider::PaymentGateway;
use crate::gateway::types::{
    parse_positive_amount, CallbackUrls, CheckoutSession, CustomerDetails, OrderRequest,
    OrderStatus, WebhookVerification,
};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("{0}")]
    Validation(String),
    #[error("User not found")]
    UserNotFound,
    #[error("Payment record not found")]
    RecordNotFound,
    #[error("Payment already processed")]
    AlreadyCompleted,
    #[error("Payment is no longer pending")]
    NotPending,
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl ReconcilerError {
    /// Human-readable message for the client-facing response body.
    pub fn user_message(&self) -> String {
        match self {
            ReconcilerError::Validation(message) => message.clone(),
            ReconcilerError::UserNotFound => "User not found".to_string(),
            ReconcilerError::RecordNotFound => "Payment record not found".to_string(),
            ReconcilerError::AlreadyCompleted => "Payment already processed".to_string(),
            ReconcilerError::NotPending => "Payment is no longer pending".to_string(),
            ReconcilerError::Gateway(e) => e.user_message(),
            ReconcilerError::Database(e) => {
                if e.is_unavailable() {
                    "Service temporarily unavailable. Please retry shortly".to_string()
                } else {
                    e.to_string()
                }
            }
        }
    }

    /// Store-level faults are reported as service errors (503), everything
    /// else is a payment-level outcome.
    pub fn is_service_error(&self) -> bool {
        matches!(self, ReconcilerError::Database(e) if e.is_unavailable())
    }
}

/// Reconciler settings shared by every payment path.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub currency: String,
    /// Base URL of the web client, used for the post-payment redirect.
    pub frontend_url: String,
    /// Base URL of this service, used for the gateway's webhook callback.
    pub backend_url: String,
    pub manual: ManualPaymentConfig,
}

/// Fields of a payment-intent request.
#[derive(Debug, Clone)]
pub struct CreatePaymentIntent {
    pub user_id: Uuid,
    pub plan_id: String,
    pub credits: i64,
    pub amount: String,
}

/// Bank/UPI instructions returned when the gateway is unconfigured.
#[derive(Debug, Clone, Serialize)]
pub struct ManualPaymentDetails {
    pub order_id: String,
    pub amount: String,
    pub plan_id: String,
    pub credits: i64,
    pub instructions: String,
    pub upi_id: String,
    pub bank_details: String,
}

/// Outcome of a payment-intent request.
#[derive(Debug, Clone)]
pub enum PaymentIntent {
    /// A gateway checkout session the client is redirected to.
    Checkout(CheckoutSession),
    /// No gateway configured; the client gets manual payment instructions
    /// and support later confirms via the manual verification path.
    Manual(ManualPaymentDetails),
}

/// Outcome of processing a gateway status report for a record.
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    CreditsApplied { balance: i64 },
    AlreadyCompleted,
    MarkedFailed,
    /// The report carried no actionable status (still pending, or the
    /// gateway was unreachable).
    Ignored,
}

/// Outcome of a client-side status poll.
#[derive(Debug, Clone)]
pub enum StatusOutcome {
    Completed { balance: i64, newly_settled: bool },
    Pending,
    Failed,
}

enum SettleOutcome {
    CreditsApplied { balance: i64 },
    AlreadyCompleted,
}

/// The payment state machine. Drives `pending -> {completed | failed}` from
/// three independent triggers (gateway webhook, client poll, manual/admin
/// confirmation) plus the background monitor, all racing on the same record.
/// The store's guarded transition makes exactly one trigger win, and only
/// the winner touches the balance.
pub struct PaymentReconciler {
    records: Arc<dyn PaymentRecordStore>,
    ledger: Arc<dyn CreditLedger>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    config: ReconcilerConfig,
}

impl PaymentReconciler {
    pub fn new(
        records: Arc<dyn PaymentRecordStore>,
        ledger: Arc<dyn CreditLedger>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            records,
            ledger,
            gateway,
            config,
        }
    }

    pub fn gateway_configured(&self) -> bool {
        self.gateway.is_some()
    }

    /// Delegate webhook signature verification to the gateway. Accepts
    /// everything when no gateway is configured (nothing should be calling
    /// the webhook endpoint in manual mode, but a crash is the wrong answer).
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        timestamp: &str,
        signature: &str,
    ) -> WebhookVerification {
        match &self.gateway {
            Some(gateway) => gateway.verify_webhook(payload, timestamp, signature),
            None => WebhookVerification {
                valid: true,
                reason: None,
            },
        }
    }

    /// Open a payment attempt: validate, create a gateway order when one is
    /// configured, and persist the `pending` record the later status reports
    /// will race to settle.
    pub async fn create_payment_intent(
        &self,
        input: CreatePaymentIntent,
    ) -> Result<PaymentIntent, ReconcilerError> {
        if input.plan_id.trim().is_empty() {
            return Err(ReconcilerError::Validation("plan_id is required".to_string()));
        }
        if input.credits <= 0 {
            return Err(ReconcilerError::Validation(
                "credits must be a positive integer".to_string(),
            ));
        }
        let amount = parse_positive_amount(&input.amount, "amount")
            .map_err(|e| ReconcilerError::Validation(e.user_message()))?;

        let user = self
            .ledger
            .find_account(input.user_id)
            .await?
            .ok_or(ReconcilerError::UserNotFound)?;

        let request_id = format!("order_{}", Uuid::new_v4().simple());
        let new_record = NewPaymentRecord {
            request_id: request_id.clone(),
            user_id: user.id,
            plan_id: input.plan_id.clone(),
            credits: input.credits,
            amount: amount.clone(),
            currency: self.config.currency.clone(),
        };

        match &self.gateway {
            Some(gateway) => {
                let session = gateway
                    .create_order(OrderRequest {
                        request_id: request_id.clone(),
                        amount,
                        currency: self.config.currency.clone(),
                        customer: CustomerDetails {
                            customer_id: user.id.to_string(),
                            name: user.name.clone(),
                            email: user.email.clone(),
                            phone: user.phone.clone(),
                        },
                        callbacks: CallbackUrls {
                            return_url: format!(
                                "{}/payment-success?order_id={{order_id}}&order_token={{order_token}}",
                                self.config.frontend_url
                            ),
                            notify_url: format!("{}/api/payment/webhook", self.config.backend_url),
                        },
                    })
                    .await?;

                self.records.create(new_record).await?;
                info!(
                    order_id = %request_id,
                    user_id = %user.id,
                    plan_id = %input.plan_id,
                    credits = input.credits,
                    "payment intent created"
                );
                Ok(PaymentIntent::Checkout(session))
            }
            None => {
                self.records.create(new_record).await?;
                info!(
                    order_id = %request_id,
                    user_id = %user.id,
                    "payment intent created in manual mode"
                );
                Ok(PaymentIntent::Manual(ManualPaymentDetails {
                    order_id: request_id,
                    amount: input.amount,
                    plan_id: input.plan_id,
                    credits: input.credits,
                    instructions: self.config.manual.instructions.clone(),
                    upi_id: self.config.manual.upi_id.clone(),
                    bank_details: self.config.manual.bank_details.clone(),
                }))
            }
        }
    }

    /// Process a gateway-pushed status report. Redelivered webhooks for a
    /// settled record are a no-op success, not an error.
    pub async fn handle_webhook(
        &self,
        request_id: &str,
        reported: OrderStatus,
    ) -> Result<WebhookOutcome, ReconcilerError> {
        let record = self
            .records
            .find_by_request_id(request_id)
            .await?
            .ok_or(ReconcilerError::RecordNotFound)?;

        match reported {
            OrderStatus::Paid => match self.settle(request_id, None).await? {
                SettleOutcome::CreditsApplied { balance } => {
                    Ok(WebhookOutcome::CreditsApplied { balance })
                }
                SettleOutcome::AlreadyCompleted => Ok(WebhookOutcome::AlreadyCompleted),
            },
            OrderStatus::Failed => match self.records.transition_to_failed(request_id).await? {
                TransitionOutcome::Transitioned(_) => {
                    info!(order_id = %request_id, "payment marked failed from gateway report");
                    Ok(WebhookOutcome::MarkedFailed)
                }
                // A PAID report won earlier; the late failure report is moot.
                TransitionOutcome::AlreadyCompleted(_) => Ok(WebhookOutcome::AlreadyCompleted),
                TransitionOutcome::NotPending(_) => Ok(WebhookOutcome::MarkedFailed),
                TransitionOutcome::NotFound => Err(ReconcilerError::RecordNotFound),
            },
            OrderStatus::Pending | OrderStatus::Unknown => {
                info!(
                    order_id = %request_id,
                    status = %record.status,
                    reported = %reported,
                    "webhook carried no terminal status, ignoring"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// Client-side poll after the checkout redirect. A completed record
    /// answers from local state; a pending one consults the gateway and
    /// settles through the same guarded path as the webhook. A gateway that
    /// cannot answer degrades to the stored status.
    pub async fn check_status(
        &self,
        request_id: &str,
        user_id: Uuid,
    ) -> Result<StatusOutcome, ReconcilerError> {
        let record = self
            .records
            .find_by_request_id_and_user(request_id, user_id)
            .await?
            .ok_or(ReconcilerError::RecordNotFound)?;

        match PaymentStatus::from_db_status(&record.status) {
            Some(PaymentStatus::Completed) => {
                let balance = self.current_balance(user_id).await?;
                Ok(StatusOutcome::Completed {
                    balance,
                    newly_settled: false,
                })
            }
            Some(PaymentStatus::Failed) => Ok(StatusOutcome::Failed),
            _ => {
                let gateway = match &self.gateway {
                    Some(gateway) => gateway,
                    None => return Ok(StatusOutcome::Pending),
                };

                match gateway.query_order_status(request_id).await {
                    OrderStatus::Paid => match self.settle(request_id, None).await? {
                        SettleOutcome::CreditsApplied { balance } => Ok(StatusOutcome::Completed {
                            balance,
                            newly_settled: true,
                        }),
                        SettleOutcome::AlreadyCompleted => {
                            let balance = self.current_balance(user_id).await?;
                            Ok(StatusOutcome::Completed {
                                balance,
                                newly_settled: false,
                            })
                        }
                    },
                    OrderStatus::Failed => {
                        match self.records.transition_to_failed(request_id).await? {
                            TransitionOutcome::AlreadyCompleted(_) => {
                                let balance = self.current_balance(user_id).await?;
                                Ok(StatusOutcome::Completed {
                                    balance,
                                    newly_settled: false,
                                })
                            }
                            _ => Ok(StatusOutcome::Failed),
                        }
                    }
                    OrderStatus::Pending | OrderStatus::Unknown => Ok(StatusOutcome::Pending),
                }
            }
        }
    }

    /// Support/admin confirmation for manual (gateway-less) payments.
    /// Returns the new balance; confirming an already settled record is the
    /// benign `AlreadyCompleted` outcome, not a fault.
    pub async fn verify_manual_payment(
        &self,
        request_id: &str,
        user_id: Uuid,
        credits: i64,
        transaction_id: Option<&str>,
    ) -> Result<i64, ReconcilerError> {
        if credits <= 0 {
            return Err(ReconcilerError::Validation(
                "credits must be a positive integer".to_string(),
            ));
        }

        let record = self
            .records
            .find_by_request_id_and_user(request_id, user_id)
            .await?
            .ok_or(ReconcilerError::RecordNotFound)?;

        if PaymentStatus::from_db_status(&record.status) == Some(PaymentStatus::Completed) {
            return Err(ReconcilerError::AlreadyCompleted);
        }
        if record.credits != credits {
            // The stored record is authoritative; the request's credits field
            // is validated but never used as the settlement amount.
            warn!(
                order_id = %request_id,
                requested = credits,
                recorded = record.credits,
                "manual verification credits differ from recorded amount"
            );
        }

        match self.settle(request_id, transaction_id).await? {
            SettleOutcome::CreditsApplied { balance } => {
                info!(
                    order_id = %request_id,
                    user_id = %user_id,
                    transaction_id = transaction_id.unwrap_or(""),
                    "manual payment verified"
                );
                Ok(balance)
            }
            SettleOutcome::AlreadyCompleted => Err(ReconcilerError::AlreadyCompleted),
        }
    }

    /// Reconcile one aged pending record against the gateway; used by the
    /// background monitor for payments whose webhook and redirect were both
    /// lost.
    pub async fn reconcile_pending_record(
        &self,
        request_id: &str,
    ) -> Result<WebhookOutcome, ReconcilerError> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| ReconcilerError::Validation("gateway not configured".to_string()))?;

        match gateway.query_order_status(request_id).await {
            OrderStatus::Paid => match self.settle(request_id, None).await? {
                SettleOutcome::CreditsApplied { balance } => {
                    Ok(WebhookOutcome::CreditsApplied { balance })
                }
                SettleOutcome::AlreadyCompleted => Ok(WebhookOutcome::AlreadyCompleted),
            },
            OrderStatus::Failed => match self.records.transition_to_failed(request_id).await? {
                TransitionOutcome::Transitioned(_) => Ok(WebhookOutcome::MarkedFailed),
                TransitionOutcome::AlreadyCompleted(_) => Ok(WebhookOutcome::AlreadyCompleted),
                TransitionOutcome::NotPending(_) => Ok(WebhookOutcome::MarkedFailed),
                TransitionOutcome::NotFound => Err(ReconcilerError::RecordNotFound),
            },
            OrderStatus::Pending | OrderStatus::Unknown => Ok(WebhookOutcome::Ignored),
        }
    }

    /// The shared settle sequence. The guarded transition runs first and is
    /// the only serialization point; the balance increment happens only on
    /// the winning path, so concurrent callers credit at most once.
    async fn settle(
        &self,
        request_id: &str,
        transaction_id: Option<&str>,
    ) -> Result<SettleOutcome, ReconcilerError> {
        match self
            .records
            .transition_to_completed(request_id, transaction_id)
            .await?
        {
            TransitionOutcome::Transitioned(record) => {
                let balance = self
                    .ledger
                    .increment_balance(record.user_id, record.credits)
                    .await
                    .map_err(|e| {
                        // The record is already completed; an increment
                        // failure here leaves credits unapplied and needs
                        // operator attention.
                        error!(
                            order_id = %request_id,
                            user_id = %record.user_id,
                            credits = record.credits,
                            error = %e,
                            "balance increment failed after completion transition"
                        );
                        e
                    })?;
                info!(
                    order_id = %request_id,
                    user_id = %record.user_id,
                    credits = record.credits,
                    balance = balance,
                    "payment settled, credits applied"
                );
                Ok(SettleOutcome::CreditsApplied { balance })
            }
            TransitionOutcome::AlreadyCompleted(_) => Ok(SettleOutcome::AlreadyCompleted),
            TransitionOutcome::NotPending(_) => Err(ReconcilerError::NotPending),
            TransitionOutcome::NotFound => Err(ReconcilerError::RecordNotFound),
        }
    }

    async fn current_balance(&self, user_id: Uuid) -> Result<i64, ReconcilerError> {
        self.ledger
            .find_account(user_id)
            .await?
            .map(|account| account.credit_balance)
            .ok_or(ReconcilerError::UserNotFound)
    }
}

//! End-to-end tests for the payment reconciliation state machine, driven
//! through in-memory store/ledger implementations and a mock gateway.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use uuid::Uuid;

use pixmint_backend::config::ManualPaymentConfig;
use pixmint_backend::database::error::{DatabaseError, DatabaseErrorKind};
use pixmint_backend::database::payment_record_repository::{
    NewPaymentRecord, PaymentRecord, TransitionOutcome,
};
use pixmint_backend::database::repository::{CreditLedger, PaymentRecordStore};
use pixmint_backend::database::user_repository::UserAccount;
use pixmint_backend::gateway::error::GatewayResult;
use pixmint_backend::gateway::provider::PaymentGateway;
use pixmint_backend::gateway::types::{
    CheckoutSession, OrderRequest, OrderStatus, WebhookVerification,
};
use pixmint_backend::services::reconciler::{
    CreatePaymentIntent, PaymentIntent, PaymentReconciler, ReconcilerConfig, ReconcilerError,
    StatusOutcome, WebhookOutcome,
};

// ---------------------------------------------------------------------------
// In-memory collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InMemoryRecordStore {
    inner: Mutex<HashMap<String, PaymentRecord>>,
}

#[async_trait]
impl PaymentRecordStore for InMemoryRecordStore {
    async fn create(&self, record: NewPaymentRecord) -> Result<PaymentRecord, DatabaseError> {
        let mut map = self.inner.lock().await;
        if map.contains_key(&record.request_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::Duplicate {
                entity: "PaymentRecord".to_string(),
                id: record.request_id,
            }));
        }
        let now = chrono::Utc::now();
        let stored = PaymentRecord {
            request_id: record.request_id.clone(),
            user_id: record.user_id,
            plan_id: record.plan_id,
            credits: record.credits,
            amount: record.amount,
            currency: record.currency,
            status: "pending".to_string(),
            transaction_id: None,
            created_at: now,
            updated_at: now,
        };
        map.insert(record.request_id, stored.clone());
        Ok(stored)
    }

    async fn find_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self.inner.lock().await.get(request_id).cloned())
    }

    async fn find_by_request_id_and_user(
        &self,
        request_id: &str,
        user_id: Uuid,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self
            .inner
            .lock()
            .await
            .get(request_id)
            .filter(|r| r.user_id == user_id)
            .cloned())
    }

    async fn transition_to_completed(
        &self,
        request_id: &str,
        transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, DatabaseError> {
        // The lock makes the check-and-set a single atomic step, mirroring
        // the conditional UPDATE of the Postgres store.
        let mut map = self.inner.lock().await;
        match map.get_mut(request_id) {
            None => Ok(TransitionOutcome::NotFound),
            Some(record) if record.status == "pending" => {
                record.status = "completed".to_string();
                if let Some(txid) = transaction_id {
                    record.transaction_id = Some(txid.to_string());
                }
                record.updated_at = chrono::Utc::now();
                Ok(TransitionOutcome::Transitioned(record.clone()))
            }
            Some(record) if record.status == "completed" => {
                Ok(TransitionOutcome::AlreadyCompleted(record.clone()))
            }
            Some(record) => Ok(TransitionOutcome::NotPending(record.clone())),
        }
    }

    async fn transition_to_failed(
        &self,
        request_id: &str,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let mut map = self.inner.lock().await;
        match map.get_mut(request_id) {
            None => Ok(TransitionOutcome::NotFound),
            Some(record) if record.status == "pending" => {
                record.status = "failed".to_string();
                record.updated_at = chrono::Utc::now();
                Ok(TransitionOutcome::Transitioned(record.clone()))
            }
            Some(record) if record.status == "completed" => {
                Ok(TransitionOutcome::AlreadyCompleted(record.clone()))
            }
            Some(record) => Ok(TransitionOutcome::NotPending(record.clone())),
        }
    }

    async fn find_pending_for_monitoring(
        &self,
        _window_hours: i32,
        _older_than_secs: i64,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError> {
        Ok(self
            .inner
            .lock()
            .await
            .values()
            .filter(|r| r.status == "pending")
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct InMemoryLedger {
    accounts: Mutex<HashMap<Uuid, UserAccount>>,
    increments: AtomicUsize,
}

impl InMemoryLedger {
    async fn insert_account(&self, account: UserAccount) {
        self.accounts.lock().await.insert(account.id, account);
    }

    fn increment_calls(&self) -> usize {
        self.increments.load(Ordering::SeqCst)
    }

    async fn balance_of(&self, user_id: Uuid) -> i64 {
        self.accounts
            .lock()
            .await
            .get(&user_id)
            .map(|a| a.credit_balance)
            .expect("account should exist")
    }
}

#[async_trait]
impl CreditLedger for InMemoryLedger {
    async fn find_account(&self, user_id: Uuid) -> Result<Option<UserAccount>, DatabaseError> {
        Ok(self.accounts.lock().await.get(&user_id).cloned())
    }

    async fn increment_balance(&self, user_id: Uuid, delta: i64) -> Result<i64, DatabaseError> {
        let mut accounts = self.accounts.lock().await;
        let account =
            accounts
                .get_mut(&user_id)
                .ok_or_else(|| {
                    DatabaseError::new(DatabaseErrorKind::NotFound {
                        entity: "User".to_string(),
                        id: user_id.to_string(),
                    })
                })?;
        if account.credit_balance + delta < 0 {
            return Err(DatabaseError::new(DatabaseErrorKind::ConstraintViolation {
                message: "insufficient credits".to_string(),
            }));
        }
        account.credit_balance += delta;
        self.increments.fetch_add(1, Ordering::SeqCst);
        Ok(account.credit_balance)
    }
}

struct MockGateway {
    status: StdMutex<OrderStatus>,
    create_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl MockGateway {
    fn new(status: OrderStatus) -> Self {
        Self {
            status: StdMutex::new(status),
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    fn set_status(&self, status: OrderStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(&self, request: OrderRequest) -> GatewayResult<CheckoutSession> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CheckoutSession {
            request_id: request.request_id,
            session_id: "session_test_123".to_string(),
            payment_link: Some("https://sandbox.cashfree.com/pay/session_test_123".to_string()),
        })
    }

    async fn query_order_status(&self, _request_id: &str) -> OrderStatus {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        *self.status.lock().unwrap()
    }

    fn verify_webhook(
        &self,
        _payload: &[u8],
        _timestamp: &str,
        _signature: &str,
    ) -> WebhookVerification {
        WebhookVerification {
            valid: true,
            reason: None,
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    records: Arc<InMemoryRecordStore>,
    ledger: Arc<InMemoryLedger>,
    gateway: Option<Arc<MockGateway>>,
    reconciler: PaymentReconciler,
    user_id: Uuid,
}

fn test_account(balance: i64) -> UserAccount {
    let now = chrono::Utc::now();
    UserAccount {
        id: Uuid::new_v4(),
        name: "Test User".to_string(),
        email: "user@example.com".to_string(),
        phone: None,
        credit_balance: balance,
        created_at: now,
        updated_at: now,
    }
}

fn test_config() -> ReconcilerConfig {
    ReconcilerConfig {
        currency: "INR".to_string(),
        frontend_url: "http://localhost:5173".to_string(),
        backend_url: "http://localhost:4000".to_string(),
        manual: ManualPaymentConfig {
            upi_id: "pay@upi".to_string(),
            bank_details: "Contact support for bank details".to_string(),
            instructions: "Pay and contact support with your transaction ID.".to_string(),
        },
    }
}

async fn harness(gateway_status: Option<OrderStatus>, initial_balance: i64) -> Harness {
    let records = Arc::new(InMemoryRecordStore::default());
    let ledger = Arc::new(InMemoryLedger::default());
    let account = test_account(initial_balance);
    let user_id = account.id;
    ledger.insert_account(account).await;

    let gateway = gateway_status.map(|status| Arc::new(MockGateway::new(status)));
    let reconciler = PaymentReconciler::new(
        records.clone() as Arc<dyn PaymentRecordStore>,
        ledger.clone() as Arc<dyn CreditLedger>,
        gateway
            .clone()
            .map(|g| g as Arc<dyn PaymentGateway>),
        test_config(),
    );

    Harness {
        records,
        ledger,
        gateway,
        reconciler,
        user_id,
    }
}

async fn create_intent(h: &Harness, credits: i64, amount: &str) -> PaymentIntent {
    h.reconciler
        .create_payment_intent(CreatePaymentIntent {
            user_id: h.user_id,
            plan_id: "basic".to_string(),
            credits,
            amount: amount.to_string(),
        })
        .await
        .expect("intent creation should succeed")
}

fn intent_request_id(intent: &PaymentIntent) -> String {
    match intent {
        PaymentIntent::Checkout(session) => session.request_id.clone(),
        PaymentIntent::Manual(details) => details.order_id.clone(),
    }
}

// ---------------------------------------------------------------------------
// Gateway-backed flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn payment_intent_creates_pending_record_and_session() {
    let h = harness(Some(OrderStatus::Pending), 0).await;
    let intent = create_intent(&h, 100, "500").await;

    let session = match &intent {
        PaymentIntent::Checkout(session) => session,
        PaymentIntent::Manual(_) => panic!("expected a gateway checkout session"),
    };
    assert_eq!(session.session_id, "session_test_123");
    assert_eq!(
        h.gateway.as_ref().unwrap().create_calls.load(Ordering::SeqCst),
        1
    );

    let record = h
        .records
        .find_by_request_id(&session.request_id)
        .await
        .unwrap()
        .expect("record should have been persisted");
    assert_eq!(record.status, "pending");
    assert_eq!(record.credits, 100);
    assert_eq!(record.user_id, h.user_id);
    assert_eq!(record.amount, BigDecimal::from(500));
}

#[tokio::test]
async fn webhook_paid_credits_exactly_once() {
    let h = harness(Some(OrderStatus::Pending), 0).await;
    let intent = create_intent(&h, 100, "500").await;
    let order_id = intent_request_id(&intent);

    let outcome = h
        .reconciler
        .handle_webhook(&order_id, OrderStatus::Paid)
        .await
        .expect("webhook should succeed");
    assert!(matches!(
        outcome,
        WebhookOutcome::CreditsApplied { balance: 100 }
    ));

    let record = h
        .records
        .find_by_request_id(&order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(h.ledger.balance_of(h.user_id).await, 100);
    assert_eq!(h.ledger.increment_calls(), 1);
}

#[tokio::test]
async fn webhook_redelivery_is_noop_success() {
    let h = harness(Some(OrderStatus::Pending), 0).await;
    let order_id = intent_request_id(&create_intent(&h, 100, "500").await);

    let first = h
        .reconciler
        .handle_webhook(&order_id, OrderStatus::Paid)
        .await
        .expect("first delivery should succeed");
    let second = h
        .reconciler
        .handle_webhook(&order_id, OrderStatus::Paid)
        .await
        .expect("redelivery should also succeed");

    assert!(matches!(first, WebhookOutcome::CreditsApplied { .. }));
    assert!(matches!(second, WebhookOutcome::AlreadyCompleted));
    assert_eq!(h.ledger.balance_of(h.user_id).await, 100);
    assert_eq!(h.ledger.increment_calls(), 1);
}

#[tokio::test]
async fn concurrent_paid_webhooks_credit_once() {
    let h = harness(Some(OrderStatus::Pending), 0).await;
    let order_id = intent_request_id(&create_intent(&h, 100, "500").await);

    let (a, b) = tokio::join!(
        h.reconciler.handle_webhook(&order_id, OrderStatus::Paid),
        h.reconciler.handle_webhook(&order_id, OrderStatus::Paid),
    );
    let outcomes = [a.expect("delivery a"), b.expect("delivery b")];

    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, WebhookOutcome::CreditsApplied { .. }))
        .count();
    assert_eq!(applied, 1, "exactly one delivery may apply credits");
    assert_eq!(h.ledger.balance_of(h.user_id).await, 100);
    assert_eq!(h.ledger.increment_calls(), 1);
}

#[tokio::test]
async fn failed_report_marks_failed_without_credit() {
    let h = harness(Some(OrderStatus::Pending), 0).await;
    let order_id = intent_request_id(&create_intent(&h, 100, "500").await);

    let outcome = h
        .reconciler
        .handle_webhook(&order_id, OrderStatus::Failed)
        .await
        .expect("failure report should be processed");
    assert!(matches!(outcome, WebhookOutcome::MarkedFailed));

    let record = h
        .records
        .find_by_request_id(&order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, "failed");
    assert_eq!(h.ledger.balance_of(h.user_id).await, 0);
    assert_eq!(h.ledger.increment_calls(), 0);

    // A late PAID report cannot resurrect a failed record.
    let late = h
        .reconciler
        .handle_webhook(&order_id, OrderStatus::Paid)
        .await;
    assert!(matches!(late, Err(ReconcilerError::NotPending)));
    assert_eq!(h.ledger.increment_calls(), 0);
}

#[tokio::test]
async fn completion_transition_rejected_on_terminal_records() {
    let store = InMemoryRecordStore::default();
    let user_id = Uuid::new_v4();
    for (request_id, terminal) in [("order_done", "completed"), ("order_dead", "failed")] {
        store
            .create(NewPaymentRecord {
                request_id: request_id.to_string(),
                user_id,
                plan_id: "basic".to_string(),
                credits: 100,
                amount: BigDecimal::from(500),
                currency: "INR".to_string(),
            })
            .await
            .unwrap();
        if terminal == "completed" {
            store.transition_to_completed(request_id, None).await.unwrap();
        } else {
            store.transition_to_failed(request_id).await.unwrap();
        }
    }

    assert!(matches!(
        store.transition_to_completed("order_done", None).await.unwrap(),
        TransitionOutcome::AlreadyCompleted(_)
    ));
    assert!(matches!(
        store.transition_to_completed("order_dead", None).await.unwrap(),
        TransitionOutcome::NotPending(_)
    ));
    assert!(matches!(
        store.transition_to_completed("order_ghost", None).await.unwrap(),
        TransitionOutcome::NotFound
    ));
}

#[tokio::test]
async fn check_status_settles_when_gateway_reports_paid() {
    let h = harness(Some(OrderStatus::Paid), 0).await;
    let order_id = intent_request_id(&create_intent(&h, 100, "500").await);

    let first = h
        .reconciler
        .check_status(&order_id, h.user_id)
        .await
        .expect("status check should succeed");
    assert!(matches!(
        first,
        StatusOutcome::Completed {
            balance: 100,
            newly_settled: true
        }
    ));
    assert_eq!(h.ledger.increment_calls(), 1);

    // A completed record answers from local state, no second gateway query.
    let queries_before = h.gateway.as_ref().unwrap().status_calls.load(Ordering::SeqCst);
    let second = h
        .reconciler
        .check_status(&order_id, h.user_id)
        .await
        .expect("second status check should succeed");
    assert!(matches!(
        second,
        StatusOutcome::Completed {
            balance: 100,
            newly_settled: false
        }
    ));
    assert_eq!(
        h.gateway.as_ref().unwrap().status_calls.load(Ordering::SeqCst),
        queries_before
    );
    assert_eq!(h.ledger.increment_calls(), 1);
}

#[tokio::test]
async fn check_status_degrades_to_stored_state_when_gateway_unreachable() {
    let h = harness(Some(OrderStatus::Unknown), 0).await;
    let order_id = intent_request_id(&create_intent(&h, 100, "500").await);

    let outcome = h
        .reconciler
        .check_status(&order_id, h.user_id)
        .await
        .expect("status check should not error on gateway outage");
    assert!(matches!(outcome, StatusOutcome::Pending));
    assert_eq!(h.ledger.increment_calls(), 0);
}

#[tokio::test]
async fn check_status_is_scoped_to_the_owning_user() {
    let h = harness(Some(OrderStatus::Paid), 0).await;
    let order_id = intent_request_id(&create_intent(&h, 100, "500").await);

    let result = h.reconciler.check_status(&order_id, Uuid::new_v4()).await;
    assert!(matches!(result, Err(ReconcilerError::RecordNotFound)));
    assert_eq!(h.ledger.increment_calls(), 0);
}

#[tokio::test]
async fn webhook_for_unknown_order_reports_not_found() {
    let h = harness(Some(OrderStatus::Pending), 0).await;
    let result = h
        .reconciler
        .handle_webhook("order_missing", OrderStatus::Paid)
        .await;
    assert!(matches!(result, Err(ReconcilerError::RecordNotFound)));
}

#[tokio::test]
async fn intent_validation_rejects_bad_input() {
    let h = harness(Some(OrderStatus::Pending), 0).await;

    let zero_credits = h
        .reconciler
        .create_payment_intent(CreatePaymentIntent {
            user_id: h.user_id,
            plan_id: "basic".to_string(),
            credits: 0,
            amount: "500".to_string(),
        })
        .await;
    assert!(matches!(zero_credits, Err(ReconcilerError::Validation(_))));

    let negative_amount = h
        .reconciler
        .create_payment_intent(CreatePaymentIntent {
            user_id: h.user_id,
            plan_id: "basic".to_string(),
            credits: 100,
            amount: "-5".to_string(),
        })
        .await;
    assert!(matches!(negative_amount, Err(ReconcilerError::Validation(_))));

    let unknown_user = h
        .reconciler
        .create_payment_intent(CreatePaymentIntent {
            user_id: Uuid::new_v4(),
            plan_id: "basic".to_string(),
            credits: 100,
            amount: "500".to_string(),
        })
        .await;
    assert!(matches!(unknown_user, Err(ReconcilerError::UserNotFound)));

    // No record and no gateway order may exist for a rejected intent.
    assert_eq!(
        h.gateway.as_ref().unwrap().create_calls.load(Ordering::SeqCst),
        0
    );
}

// ---------------------------------------------------------------------------
// Manual (gateway-less) flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manual_flow_credits_once_and_rejects_double_confirmation() {
    let h = harness(None, 0).await;
    let intent = create_intent(&h, 100, "500").await;

    let details = match &intent {
        PaymentIntent::Manual(details) => details,
        PaymentIntent::Checkout(_) => panic!("expected manual payment instructions"),
    };
    assert_eq!(details.credits, 100);
    assert_eq!(details.upi_id, "pay@upi");

    // The pending record exists so support has something to confirm.
    let record = h
        .records
        .find_by_request_id(&details.order_id)
        .await
        .unwrap()
        .expect("manual mode must persist a pending record");
    assert_eq!(record.status, "pending");

    let balance = h
        .reconciler
        .verify_manual_payment(&details.order_id, h.user_id, 100, Some("TXN-42"))
        .await
        .expect("manual verification should succeed");
    assert_eq!(balance, 100);
    assert_eq!(h.ledger.increment_calls(), 1);

    let record = h
        .records
        .find_by_request_id(&details.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(record.transaction_id.as_deref(), Some("TXN-42"));

    let again = h
        .reconciler
        .verify_manual_payment(&details.order_id, h.user_id, 100, Some("TXN-42"))
        .await;
    assert!(matches!(again, Err(ReconcilerError::AlreadyCompleted)));
    assert_eq!(h.ledger.balance_of(h.user_id).await, 100);
    assert_eq!(h.ledger.increment_calls(), 1);
}

#[tokio::test]
async fn manual_mode_pending_status_check_reports_pending() {
    let h = harness(None, 0).await;
    let order_id = intent_request_id(&create_intent(&h, 100, "500").await);

    let outcome = h
        .reconciler
        .check_status(&order_id, h.user_id)
        .await
        .expect("status check should succeed without a gateway");
    assert!(matches!(outcome, StatusOutcome::Pending));
}

#[tokio::test]
async fn concurrent_manual_and_webhook_confirmations_credit_once() {
    let h = harness(Some(OrderStatus::Pending), 0).await;
    let order_id = intent_request_id(&create_intent(&h, 100, "500").await);

    let (webhook, manual) = tokio::join!(
        h.reconciler.handle_webhook(&order_id, OrderStatus::Paid),
        h.reconciler
            .verify_manual_payment(&order_id, h.user_id, 100, Some("TXN-7")),
    );

    // Whichever trigger wins, credits land exactly once.
    let webhook_applied = matches!(webhook, Ok(WebhookOutcome::CreditsApplied { .. }));
    let manual_applied = manual.is_ok();
    assert!(webhook_applied || manual_applied);
    assert_eq!(h.ledger.balance_of(h.user_id).await, 100);
    assert_eq!(h.ledger.increment_calls(), 1);
}

// ---------------------------------------------------------------------------
// Mock-gateway reuse by the monitor path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn monitor_reconciliation_settles_lost_payment() {
    let h = harness(Some(OrderStatus::Paid), 0).await;
    let order_id = intent_request_id(&create_intent(&h, 100, "500").await);

    let outcome = h
        .reconciler
        .reconcile_pending_record(&order_id)
        .await
        .expect("monitor reconciliation should succeed");
    assert!(matches!(outcome, WebhookOutcome::CreditsApplied { .. }));
    assert_eq!(h.ledger.balance_of(h.user_id).await, 100);

    // A second sweep over the now-settled record is a no-op.
    let again = h
        .reconciler
        .reconcile_pending_record(&order_id)
        .await
        .expect("repeat reconciliation should succeed");
    assert!(matches!(again, WebhookOutcome::AlreadyCompleted));
    assert_eq!(h.ledger.increment_calls(), 1);
}

#[tokio::test]
async fn monitor_leaves_unreachable_gateway_records_pending() {
    let h = harness(Some(OrderStatus::Pending), 0).await;
    let order_id = intent_request_id(&create_intent(&h, 100, "500").await);

    h.gateway.as_ref().unwrap().set_status(OrderStatus::Unknown);
    let outcome = h
        .reconciler
        .reconcile_pending_record(&order_id)
        .await
        .expect("reconciliation should tolerate an unreachable gateway");
    assert!(matches!(outcome, WebhookOutcome::Ignored));

    let record = h
        .records
        .find_by_request_id(&order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, "pending");
}

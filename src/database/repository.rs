use crate::database::error::DatabaseError;
use crate::database::payment_record_repository::{
    NewPaymentRecord, PaymentRecord, TransitionOutcome,
};
use crate::database::user_repository::UserAccount;
use async_trait::async_trait;
use uuid::Uuid;

/// Durable store of payment attempts keyed by request id.
///
/// Implementations must make the two `transition_*` operations atomic with
/// respect to concurrent callers on the same request id: a single guarded
/// write, not a read-then-write sequence. That guarantee is what the
/// reconciler's exactly-once crediting rests on.
#[async_trait]
pub trait PaymentRecordStore: Send + Sync {
    /// Insert a fresh `pending` record. Fails with a `Duplicate` kind when
    /// the request id already exists.
    async fn create(&self, record: NewPaymentRecord) -> Result<PaymentRecord, DatabaseError>;

    async fn find_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// User-scoped lookup for client-facing status checks; a record owned by
    /// another user is indistinguishable from a missing one.
    async fn find_by_request_id_and_user(
        &self,
        request_id: &str,
        user_id: Uuid,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn transition_to_completed(
        &self,
        request_id: &str,
        transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, DatabaseError>;

    async fn transition_to_failed(
        &self,
        request_id: &str,
    ) -> Result<TransitionOutcome, DatabaseError>;

    async fn find_pending_for_monitoring(
        &self,
        window_hours: i32,
        older_than_secs: i64,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError>;
}

/// Atomic balance mutation on the user entity.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn find_account(&self, user_id: Uuid) -> Result<Option<UserAccount>, DatabaseError>;

    /// Apply a signed delta (positive purchase credit, negative generation
    /// debit) as one atomic increment and return the new balance.
    async fn increment_balance(&self, user_id: Uuid, delta: i64) -> Result<i64, DatabaseError>;
}

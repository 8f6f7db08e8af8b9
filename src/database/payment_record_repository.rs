use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::PaymentRecordStore;
use async_trait::async_trait;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

/// A single payment attempt. One row per request id, never deleted;
/// `status` only ever moves forward (`pending` -> `completed` | `failed`).
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRecord {
    pub request_id: String,
    pub user_id: Uuid,
    pub plan_id: String,
    pub credits: i64,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Fields required to open a new payment attempt.
#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub request_id: String,
    pub user_id: Uuid,
    pub plan_id: String,
    pub credits: i64,
    pub amount: BigDecimal,
    pub currency: String,
}

/// Payment record lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_db_status(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status.to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_db_status())
    }
}

/// Result of a guarded terminal transition. The guarded write succeeds for
/// exactly one caller per record; everyone else learns why they lost.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// This caller won the transition; the returned record carries the new
    /// terminal status.
    Transitioned(PaymentRecord),
    /// The record was already completed before this call.
    AlreadyCompleted(PaymentRecord),
    /// The record is in another terminal state (failed).
    NotPending(PaymentRecord),
    /// No record exists for the request id.
    NotFound,
}

const RECORD_COLUMNS: &str = "request_id, user_id, plan_id, credits, amount, currency, \
     status, transaction_id, created_at, updated_at";

/// Postgres-backed store for payment records.
pub struct PaymentRecordRepository {
    pool: PgPool,
}

impl PaymentRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Classify a guarded write that matched no row.
    async fn classify_miss(&self, request_id: &str) -> Result<TransitionOutcome, DatabaseError> {
        let existing = self.fetch_by_request_id(request_id).await?;
        match existing {
            None => Ok(TransitionOutcome::NotFound),
            Some(record) => match PaymentStatus::from_db_status(&record.status) {
                Some(PaymentStatus::Completed) => Ok(TransitionOutcome::AlreadyCompleted(record)),
                _ => Ok(TransitionOutcome::NotPending(record)),
            },
        }
    }

    async fn fetch_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM payment_records WHERE request_id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl PaymentRecordStore for PaymentRecordRepository {
    async fn create(&self, record: NewPaymentRecord) -> Result<PaymentRecord, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "INSERT INTO payment_records \
             (request_id, user_id, plan_id, credits, amount, currency, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'pending') \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(&record.request_id)
        .bind(record.user_id)
        .bind(&record.plan_id)
        .bind(record.credits)
        .bind(&record.amount)
        .bind(&record.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DatabaseError::new(DatabaseErrorKind::Duplicate {
                    entity: "PaymentRecord".to_string(),
                    id: record.request_id.clone(),
                })
            }
            _ => DatabaseError::from_sqlx(e),
        })
    }

    async fn find_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        self.fetch_by_request_id(request_id).await
    }

    async fn find_by_request_id_and_user(
        &self,
        request_id: &str,
        user_id: Uuid,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM payment_records \
             WHERE request_id = $1 AND user_id = $2"
        ))
        .bind(request_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Guarded completion. A single conditional UPDATE is the serialization
    /// point: two concurrent callers racing on the same request id see
    /// exactly one `Transitioned` and one `AlreadyCompleted`.
    async fn transition_to_completed(
        &self,
        request_id: &str,
        transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let updated = sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payment_records \
             SET status = 'completed', \
                 transaction_id = COALESCE($2, transaction_id), \
                 updated_at = NOW() \
             WHERE request_id = $1 AND status = 'pending' \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(request_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match updated {
            Some(record) => Ok(TransitionOutcome::Transitioned(record)),
            None => self.classify_miss(request_id).await,
        }
    }

    async fn transition_to_failed(
        &self,
        request_id: &str,
    ) -> Result<TransitionOutcome, DatabaseError> {
        let updated = sqlx::query_as::<_, PaymentRecord>(&format!(
            "UPDATE payment_records \
             SET status = 'failed', updated_at = NOW() \
             WHERE request_id = $1 AND status = 'pending' \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match updated {
            Some(record) => Ok(TransitionOutcome::Transitioned(record)),
            None => self.classify_miss(request_id).await,
        }
    }

    /// Pending records old enough to be worth re-checking against the
    /// gateway, bounded to a recent window so abandoned attempts age out.
    async fn find_pending_for_monitoring(
        &self,
        window_hours: i32,
        older_than_secs: i64,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM payment_records \
             WHERE status = 'pending' \
               AND created_at > NOW() - INTERVAL '1 hour' * $1 \
               AND created_at < NOW() - INTERVAL '1 second' * $2 \
             ORDER BY created_at ASC \
             LIMIT $3"
        ))
        .bind(window_hours)
        .bind(older_than_secs)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_db_strings() {
        assert_eq!(
            PaymentStatus::from_db_status("pending"),
            Some(PaymentStatus::Pending)
        );
        assert_eq!(
            PaymentStatus::from_db_status("COMPLETED"),
            Some(PaymentStatus::Completed)
        );
        assert_eq!(
            PaymentStatus::from_db_status("failed"),
            Some(PaymentStatus::Failed)
        );
        assert_eq!(PaymentStatus::from_db_status("refunded"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
    }
}

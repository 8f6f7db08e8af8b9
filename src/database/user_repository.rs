use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::CreditLedger;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// User account as seen by the payment subsystem. Owned by the auth service;
/// this subsystem only reads identity fields and mutates `credit_balance`.
#[derive(Debug, Clone, FromRow)]
pub struct UserAccount {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub credit_balance: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const USER_COLUMNS: &str = "id, name, email, phone, credit_balance, created_at, updated_at";

/// Postgres-backed credit ledger over the users table.
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditLedger for UserRepository {
    async fn find_account(&self, user_id: Uuid) -> Result<Option<UserAccount>, DatabaseError> {
        sqlx::query_as::<_, UserAccount>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Apply a signed credit delta in a single atomic increment. The balance
    /// is never allowed below zero; a debit that would overdraw matches no
    /// row and is reported as a constraint violation.
    async fn increment_balance(&self, user_id: Uuid, delta: i64) -> Result<i64, DatabaseError> {
        let updated = sqlx::query_as::<_, (i64,)>(
            "UPDATE users \
             SET credit_balance = credit_balance + $2, updated_at = NOW() \
             WHERE id = $1 AND credit_balance + $2 >= 0 \
             RETURNING credit_balance",
        )
        .bind(user_id)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match updated {
            Some((balance,)) => Ok(balance),
            None => {
                let exists = self.find_account(user_id).await?.is_some();
                if exists {
                    Err(DatabaseError::new(DatabaseErrorKind::ConstraintViolation {
                        message: format!(
                            "insufficient credits for user {} (delta {})",
                            user_id, delta
                        ),
                    }))
                } else {
                    Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                        entity: "User".to_string(),
                        id: user_id.to_string(),
                    }))
                }
            }
        }
    }
}

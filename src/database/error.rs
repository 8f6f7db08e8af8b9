use thiserror::Error;

/// Classified database failure kinds.
#[derive(Debug, Clone, Error)]
pub enum DatabaseErrorKind {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("{entity} already exists: {id}")]
    Duplicate { entity: String, id: String },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("operation timed out: {message}")]
    Timeout { message: String },

    #[error("query failed: {message}")]
    Query { message: String },

    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("database error: {message}")]
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::Query {
                message: "expected row was not found".to_string(),
            },
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::Timeout {
                message: "timed out acquiring a connection from the pool".to_string(),
            },
            sqlx::Error::PoolClosed => DatabaseErrorKind::Connection {
                message: "connection pool is closed".to_string(),
            },
            sqlx::Error::Io(e) => DatabaseErrorKind::Connection {
                message: e.to_string(),
            },
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() {
                    DatabaseErrorKind::ConstraintViolation {
                        message: db.message().to_string(),
                    }
                } else if db.is_check_violation() || db.is_foreign_key_violation() {
                    DatabaseErrorKind::ConstraintViolation {
                        message: db.message().to_string(),
                    }
                } else {
                    DatabaseErrorKind::Query {
                        message: db.message().to_string(),
                    }
                }
            }
            other => DatabaseErrorKind::Unknown {
                message: other.to_string(),
            },
        };
        Self::new(kind)
    }

    /// True for infrastructure-level failures (pool exhausted, connection
    /// lost, unclassified) as opposed to record-level outcomes. Callers use
    /// this to surface a service error instead of a payment failure.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::Connection { .. }
                | DatabaseErrorKind::Timeout { .. }
                | DatabaseErrorKind::Query { .. }
                | DatabaseErrorKind::Unknown { .. }
        )
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Duplicate { .. })
    }
}

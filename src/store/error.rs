//! Store Errors
//!
//! Error types for storage operations.

use crate::domain::LedgerError;

/// Errors that can occur in a ledger store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another unit of work already recorded this reference id
    #[error("Reference already recorded: {0}")]
    DuplicateReference(String),

    /// Storage cannot be reached
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored row could not be mapped back to a domain type
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl StoreError {
    /// Check if this error is a lost race on the reference id
    pub fn is_duplicate_reference(&self) -> bool {
        matches!(self, StoreError::DuplicateReference(_))
    }

    /// Check if the store refused the data itself, so a retry would fail the same way.
    ///
    /// SQLSTATE class 22 (data exception) and 23 (integrity constraint) are
    /// permanent, except a unique violation on the reference id, which is a
    /// lost race.
    pub fn is_permanent(&self) -> bool {
        match self {
            StoreError::InvalidData(_) | StoreError::Serialization(_) => true,
            StoreError::Database(sqlx::Error::Database(db_err)) => {
                let class_22_or_23 = db_err
                    .code()
                    .map(|code| code.starts_with("22") || code.starts_with("23"))
                    .unwrap_or(false);
                let reference_conflict = db_err.is_unique_violation()
                    && db_err
                        .constraint()
                        .map(|c| c.contains("reference_id"))
                        .unwrap_or(false);
                class_22_or_23 && !reference_conflict
            }
            _ => false,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        if err.is_permanent() {
            LedgerError::StorageRejected(err.to_string())
        } else {
            LedgerError::TransientStorage(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::error::Error as StdError;

    use sqlx::error::{DatabaseError, ErrorKind};

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("{message}")]
    struct PgFailure {
        code: &'static str,
        constraint: Option<&'static str>,
        message: &'static str,
    }

    impl DatabaseError for PgFailure {
        fn message(&self) -> &str {
            self.message
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn kind(&self) -> ErrorKind {
            match self.code {
                "23505" => ErrorKind::UniqueViolation,
                "23503" => ErrorKind::ForeignKeyViolation,
                _ => ErrorKind::Other,
            }
        }
    }

    fn pg(code: &'static str, constraint: Option<&'static str>) -> StoreError {
        StoreError::Database(sqlx::Error::Database(Box::new(PgFailure {
            code,
            constraint,
            message: "rejected",
        })))
    }

    #[test]
    fn test_data_exceptions_are_rejections() {
        // invalid byte sequence (NUL in text), bigint out of range, check violation
        for code in ["22021", "22003", "23514"] {
            let err: LedgerError = pg(code, None).into();
            assert!(matches!(err, LedgerError::StorageRejected(_)), "{}", code);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_reference_conflict_is_not_a_rejection() {
        let err = pg("23505", Some("transactions_reference_id_key"));
        assert!(!err.is_permanent());
        assert!(pg("23505", Some("accounts_pkey")).is_permanent());
    }

    #[test]
    fn test_connection_level_errors_stay_transient() {
        // serialization_failure, admin_shutdown
        for code in ["40001", "57P01"] {
            let err: LedgerError = pg(code, None).into();
            assert!(matches!(err, LedgerError::TransientStorage(_)), "{}", code);
        }
        let err: LedgerError = StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invalid_data_is_a_rejection() {
        let err: LedgerError = StoreError::InvalidData("balance out of range".into()).into();
        assert!(matches!(err, LedgerError::StorageRejected(_)));
    }

    #[test]
    fn test_store_errors_become_transient() {
        let err: LedgerError = StoreError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, LedgerError::TransientStorage(ref m) if m.contains("connection refused")));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_duplicate_reference_flag() {
        assert!(StoreError::DuplicateReference("pay_1".into()).is_duplicate_reference());
        assert!(!StoreError::InvalidData("x".into()).is_duplicate_reference());
    }
}

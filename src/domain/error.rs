//! Ledger Error Types
//!
//! The error taxonomy shared by every ledger operation. Infrastructure errors
//! (storage, bus) are converted into these before they leave a component.

use thiserror::Error;

/// Ledger-level errors
///
/// An idempotent replay is not represented here: it is a successful outcome
/// reported through `RecordTransactionResult::is_replay`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Input rejected before anything was written
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage unavailable or timed out; the unit of work was rolled back
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// Storage refused the data; retrying the same request cannot succeed
    #[error("Storage rejected the request: {0}")]
    StorageRejected(String),

    /// Delivery to the outbound stream failed
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Inbound message can never be processed
    #[error("Poison message: {0}")]
    PoisonMessage(String),

    /// Caller-supplied deadline elapsed before commit
    #[error("Deadline exceeded before commit")]
    DeadlineExceeded,

    /// Caller cancelled the operation before commit
    #[error("Operation cancelled before commit")]
    Cancelled,
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Check if this is a client error (caller must fix the input)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }

    /// Check if retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientStorage(_)
                | Self::Publish(_)
                | Self::DeadlineExceeded
                | Self::Cancelled
        )
    }
}

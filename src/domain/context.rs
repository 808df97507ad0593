//! Operation Context
//!
//! Contains metadata about the current operation for tracing, plus the
//! caller's deadline and cancellation signal.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::LedgerError;

/// Context for an operation, used for tracing and cancellation.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Correlation ID for request tracing
    pub correlation_id: Option<Uuid>,

    /// Maximum time the operation may take before it is abandoned
    pub timeout: Option<Duration>,

    /// Caller-controlled cancellation
    pub cancellation: Option<CancellationToken>,
}

impl OperationContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Create context with a deadline relative to now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Create context bound to a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }

    /// Drive `fut` under this context's deadline and cancellation.
    ///
    /// When either fires first, `fut` is dropped. Units of work roll back on
    /// drop, so nothing partial is ever committed.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .map_err(|_| LedgerError::DeadlineExceeded)?,
                None => fut.await,
            }
        };

        match &self.cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(LedgerError::Cancelled),
                    result = bounded => result,
                }
            }
            None => bounded.await,
        }
    }
}

//! Payment Event Consumer
//!
//! Reads `payment.succeeded` events through a consumer group and records a
//! balanced pair for each: the user's wallet is credited `+amount` and the
//! clearing account is debited `-amount`.
//!
//! Acknowledgement policy:
//! - recorded, replayed or ignored: acknowledged
//! - can never succeed (malformed, no wallet, rejected): dead-lettered, then
//!   acknowledged
//! - transient failure: left unacknowledged so the bus redelivers it

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{Delivery, MessageSource};
use crate::domain::{
    system_clearing_account_id, EntryRequest, LedgerError, OperationContext, PaymentEvent,
    PaymentSucceeded,
};
use crate::handlers::{AccountRegistry, RecordTransactionCommand, TransactionProcessor};
use crate::metrics::{outcome, LedgerMetrics};

/// Configuration for the payment consumer
#[derive(Debug, Clone)]
pub struct PaymentConsumerConfig {
    /// Messages requested per receive
    pub batch_size: usize,
    /// How long a receive blocks waiting for new messages
    pub block_for: Duration,
    /// Pause after a transient failure before reading again
    pub retry_backoff: Duration,
    /// Upper bound on handling one message
    pub message_timeout: Duration,
    /// Consecutive transient failures that raise an alert
    pub alert_after_failures: u32,
    /// Account debited for every inbound payment
    pub clearing_account_id: Uuid,
}

impl Default for PaymentConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            block_for: Duration::from_secs(2),
            retry_backoff: Duration::from_secs(1),
            message_timeout: Duration::from_secs(10),
            alert_after_failures: 5,
            clearing_account_id: system_clearing_account_id(),
        }
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Recorded(Uuid),
    Replayed(Uuid),
    /// Event type the ledger does not act on
    Ignored(String),
    DeadLettered(String),
    /// Left unacknowledged for redelivery
    Retry(LedgerError),
}

impl MessageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            MessageOutcome::Recorded(_) => outcome::RECORDED,
            MessageOutcome::Replayed(_) => outcome::REPLAYED,
            MessageOutcome::Ignored(_) => outcome::IGNORED,
            MessageOutcome::DeadLettered(_) => outcome::DEAD_LETTERED,
            MessageOutcome::Retry(_) => outcome::RETRY,
        }
    }

    fn is_acknowledged(&self) -> bool {
        !matches!(self, MessageOutcome::Retry(_))
    }
}

/// Payment stream consumer
pub struct PaymentEventConsumer {
    source: Arc<dyn MessageSource>,
    registry: AccountRegistry,
    processor: TransactionProcessor,
    metrics: LedgerMetrics,
    config: PaymentConsumerConfig,
    consecutive_failures: AtomicU32,
}

impl PaymentEventConsumer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        registry: AccountRegistry,
        processor: TransactionProcessor,
        metrics: LedgerMetrics,
        config: PaymentConsumerConfig,
    ) -> Self {
        Self {
            source,
            registry,
            processor,
            metrics,
            config,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Transient failures since the last message that was settled
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Start the consumer in the background.
    ///
    /// On shutdown it stops receiving, finishes the message in hand and exits.
    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            batch_size = self.config.batch_size,
            clearing_account_id = %self.config.clearing_account_id,
            "Payment consumer started"
        );

        while !shutdown.is_cancelled() {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                r = self.source.receive(self.config.batch_size, self.config.block_for) => r,
            };

            let deliveries = match received {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    self.note_failure(&LedgerError::from(e));
                    self.backoff(&shutdown).await;
                    continue;
                }
            };

            for delivery in &deliveries {
                let outcome = self.handle(delivery).await;
                if !outcome.is_acknowledged() {
                    // The rest of the batch comes back with the redelivery.
                    self.backoff(&shutdown).await;
                    break;
                }
                if shutdown.is_cancelled() {
                    break;
                }
            }
        }

        tracing::info!("Payment consumer stopped");
    }

    async fn backoff(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.retry_backoff) => {}
        }
    }

    /// Process one delivery and settle it with the bus
    pub async fn handle(&self, delivery: &Delivery) -> MessageOutcome {
        let outcome = match self.process(delivery).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_retryable() => MessageOutcome::Retry(e),
            Err(e) => match self.source.dead_letter(delivery, &e.to_string()).await {
                Ok(()) => MessageOutcome::DeadLettered(e.to_string()),
                Err(dlq_err) => {
                    tracing::error!(
                        message_id = %delivery.message_id,
                        error = %dlq_err,
                        "Dead-letter write failed; message will be redelivered"
                    );
                    MessageOutcome::Retry(LedgerError::from(dlq_err))
                }
            },
        };

        if outcome.is_acknowledged() {
            if let Err(e) = self.source.acknowledge(&delivery.message_id).await {
                // Redelivery replays harmlessly.
                tracing::warn!(message_id = %delivery.message_id, error = %e, "Acknowledge failed");
            }
        }

        match &outcome {
            MessageOutcome::Retry(e) => self.note_failure(e),
            MessageOutcome::DeadLettered(reason) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                tracing::warn!(message_id = %delivery.message_id, reason = %reason, "Payment message dead-lettered");
            }
            MessageOutcome::Ignored(event_type) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                tracing::debug!(message_id = %delivery.message_id, event_type = %event_type, "Payment message ignored");
            }
            MessageOutcome::Recorded(_) | MessageOutcome::Replayed(_) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
        }

        self.metrics.record_payment_message(outcome.label());
        outcome
    }

    async fn process(&self, delivery: &Delivery) -> Result<MessageOutcome, LedgerError> {
        let payment = match PaymentEvent::decode(&delivery.payload)? {
            PaymentEvent::Succeeded(payment) => payment,
            PaymentEvent::Other(event_type) => return Ok(MessageOutcome::Ignored(event_type)),
        };

        let mut context = OperationContext::new().with_timeout(self.config.message_timeout);
        let correlation_id = context.ensure_correlation_id();

        let wallet = self.registry.find_wallet(&payment.user_id, &context).await?;
        let result = self
            .processor
            .record_transaction(self.command_for(&payment, wallet.id), &context)
            .await?;

        tracing::info!(
            message_id = %delivery.message_id,
            payment_id = %payment.id,
            user_id = %payment.user_id,
            amount = payment.amount,
            transaction_id = %result.transaction_id,
            is_replay = result.is_replay,
            correlation_id = %correlation_id,
            "Payment applied to ledger"
        );

        Ok(if result.is_replay {
            MessageOutcome::Replayed(result.transaction_id)
        } else {
            MessageOutcome::Recorded(result.transaction_id)
        })
    }

    fn command_for(&self, payment: &PaymentSucceeded, wallet_id: Uuid) -> RecordTransactionCommand {
        RecordTransactionCommand::new(
            payment.id.clone(),
            format!("payment {} succeeded ({})", payment.id, payment.currency),
            vec![
                EntryRequest::credit(wallet_id, payment.amount),
                EntryRequest::debit(self.config.clearing_account_id, -payment.amount),
            ],
        )
    }

    fn note_failure(&self, error: &LedgerError) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(error = %error, consecutive_failures = failures, "Payment message not processed; will retry");

        let threshold = self.config.alert_after_failures.max(1);
        if failures % threshold == 0 {
            tracing::error!(
                consecutive_failures = failures,
                error = %error,
                "ALERT: payment consumer is failing repeatedly"
            );
        }
    }
}

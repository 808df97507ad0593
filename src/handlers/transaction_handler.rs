//! Transaction Processor
//!
//! Records balanced transactions. The transaction row, its entries and the
//! `ledger.transaction.recorded` outbox row are written in one unit of work,
//! so either all of them become visible or none do.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{
    account_deltas, validate_entries, LedgerError, NewOutboxEvent, OperationContext, Transaction,
};
use crate::idempotency::compute_request_hash;
use crate::metrics::{status, LedgerMetrics};
use crate::store::{LedgerStore, StoreError};

use super::{RecordTransactionCommand, RecordTransactionResult};

/// Sole writer of transactions, entries and outbox rows
#[derive(Clone)]
pub struct TransactionProcessor {
    store: Arc<dyn LedgerStore>,
    metrics: LedgerMetrics,
}

impl TransactionProcessor {
    pub fn new(store: Arc<dyn LedgerStore>, metrics: LedgerMetrics) -> Self {
        Self { store, metrics }
    }

    /// Record a transaction, or return the one already recorded under the
    /// same reference id.
    pub async fn record_transaction(
        &self,
        command: RecordTransactionCommand,
        context: &OperationContext,
    ) -> Result<RecordTransactionResult, LedgerError> {
        let timer = self.metrics.transaction_latency.start_timer();

        if let Err(e) = validate_entries(&command.reference_id, &command.entries) {
            timer.stop_and_discard();
            self.metrics.record_transaction(status::REJECTED);
            tracing::info!(
                reference_id = %command.reference_id,
                error = %e,
                "Transaction rejected"
            );
            return Err(e);
        }

        let result = context.run(self.execute(&command)).await;
        timer.observe_duration();

        match &result {
            Ok(r) if r.is_replay => {
                self.metrics.record_transaction(status::REPLAYED);
                tracing::info!(
                    reference_id = %command.reference_id,
                    transaction_id = %r.transaction_id,
                    correlation_id = ?context.correlation_id,
                    "Idempotent replay"
                );
            }
            Ok(r) => {
                self.metrics.record_transaction(status::RECORDED);
                tracing::info!(
                    reference_id = %command.reference_id,
                    transaction_id = %r.transaction_id,
                    entries = command.entries.len(),
                    correlation_id = ?context.correlation_id,
                    "Transaction recorded"
                );
            }
            Err(e) if e.is_client_error() => {
                self.metrics.record_transaction(status::REJECTED);
                tracing::info!(reference_id = %command.reference_id, error = %e, "Transaction rejected");
            }
            Err(e) => {
                self.metrics.record_transaction(status::FAILED);
                tracing::warn!(reference_id = %command.reference_id, error = %e, "Transaction failed");
            }
        }

        result
    }

    /// Read back a transaction with its entries
    pub async fn get_transaction(
        &self,
        transaction_id: Uuid,
        context: &OperationContext,
    ) -> Result<Transaction, LedgerError> {
        context
            .run(async {
                self.store
                    .get_transaction(transaction_id)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::not_found(format!("transaction {}", transaction_id))
                    })
            })
            .await
    }

    async fn execute(
        &self,
        command: &RecordTransactionCommand,
    ) -> Result<RecordTransactionResult, LedgerError> {
        let deltas = account_deltas(&command.entries)?;
        let request_hash = compute_request_hash(
            &command.reference_id,
            &command.description,
            &command.entries,
        );

        let mut uow = self.store.begin().await?;

        // Fast path: the reference was already recorded.
        if let Some(existing) = uow.find_by_reference(&command.reference_id).await? {
            uow.rollback().await?;
            if !existing.matches(&request_hash) {
                tracing::warn!(
                    reference_id = %command.reference_id,
                    transaction_id = %existing.transaction_id,
                    "Reference id reused with a different request; replaying original"
                );
            }
            return Ok(RecordTransactionResult::replayed(existing.transaction_id));
        }

        let transaction = Transaction::from_requests(
            &command.reference_id,
            &command.description,
            &command.entries,
        );

        let missing = uow.missing_accounts(&transaction.account_ids()).await?;
        if !missing.is_empty() {
            uow.rollback().await?;
            let ids: Vec<String> = missing.iter().map(Uuid::to_string).collect();
            return Err(LedgerError::validation(format!(
                "unknown account(s): {}",
                ids.join(", ")
            )));
        }

        // Every balance must stay representable as i64
        for (account_id, delta) in deltas {
            if delta != 0 && !uow.balance_fits(account_id, delta).await? {
                uow.rollback().await?;
                return Err(LedgerError::validation(format!(
                    "transaction would move the balance of account {} out of range",
                    account_id
                )));
            }
        }

        let outbox_event = NewOutboxEvent::transaction_recorded(&transaction)
            .map_err(StoreError::from)?;

        let written = async {
            uow.insert_transaction(&transaction, &request_hash).await?;
            for entry in &transaction.entries {
                uow.insert_entry(entry).await?;
            }
            uow.insert_outbox_event(&outbox_event).await?;
            Ok::<_, StoreError>(())
        }
        .await;

        let committed = match written {
            Ok(()) => uow.commit().await,
            // Dropping the unit of work rolls it back.
            Err(e) => Err(e),
        };

        match committed {
            Ok(()) => Ok(RecordTransactionResult::recorded(transaction.id)),
            Err(e) if e.is_duplicate_reference() => self.resolve_lost_race(command).await,
            Err(e) => Err(e.into()),
        }
    }

    /// A concurrent request won the reference id; return its transaction.
    async fn resolve_lost_race(
        &self,
        command: &RecordTransactionCommand,
    ) -> Result<RecordTransactionResult, LedgerError> {
        tracing::debug!(
            reference_id = %command.reference_id,
            "Lost race on reference id; reading winner"
        );

        match self.store.find_by_reference(&command.reference_id).await? {
            Some(winner) => Ok(RecordTransactionResult::replayed(winner.transaction_id)),
            None => Err(LedgerError::TransientStorage(format!(
                "reference {} conflicted but no committed transaction was found",
                command.reference_id
            ))),
        }
    }
}

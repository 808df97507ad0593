//! Store module
//!
//! Storage port for the ledger. `LedgerStore` covers reads and the outbox
//! lifecycle; `UnitOfWork` is one atomic write scope in which a transaction,
//! its entries and its outbox row are created together.
//!
//! Two adapters: `PgLedgerStore` (PostgreSQL) and `InMemoryLedgerStore`
//! (tests and local development).

mod error;
mod memory;
mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Account, AccountType, Entry, NewOutboxEvent, OutboxEvent, Transaction};
use crate::idempotency::IdempotencyRecord;

pub use error::StoreError;
pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Parameters of one outbox claim
#[derive(Debug, Clone)]
pub struct OutboxClaim {
    /// Identifies the publisher instance holding the claim
    pub instance_id: String,
    /// Maximum number of events to claim
    pub batch_size: i64,
    /// How long the claim stays exclusive
    pub lease: Duration,
}

/// Shared, read-mostly access to the ledger plus outbox bookkeeping
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist a new account
    async fn create_account(&self, account: &Account) -> Result<(), StoreError>;

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Find the account of `account_type` owned by an external user
    async fn find_account_by_owner(
        &self,
        owner_user_id: &str,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError>;

    /// Signed sum of all committed entry amounts for the account
    async fn account_balance(&self, account_id: Uuid) -> Result<i64, StoreError>;

    /// Transaction with its entries in creation order
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;

    /// Committed idempotency record for a reference id
    async fn find_by_reference(&self, reference_id: &str)
        -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Open a new atomic unit of work
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Claim up to `batch_size` pending outbox events, oldest first.
    ///
    /// Events already claimed by a live lease are skipped.
    async fn claim_pending_events(&self, claim: &OutboxClaim)
        -> Result<Vec<OutboxEvent>, StoreError>;

    /// Set `processed_at`. Returns false if it was already set.
    async fn mark_event_processed(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Drop a claim so the event is retried on the next cycle
    async fn release_claim(&self, id: Uuid, instance_id: &str) -> Result<(), StoreError>;

    /// Number of events not yet published
    async fn pending_event_count(&self) -> Result<i64, StoreError>;
}

/// One atomic write scope. Dropping it without `commit` rolls back.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Return the ids among `account_ids` that do not exist
    async fn missing_accounts(&mut self, account_ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError>;

    /// Whether the account's committed balance plus `delta` stays within `i64`
    async fn balance_fits(&mut self, account_id: Uuid, delta: i64) -> Result<bool, StoreError>;

    /// Insert the transaction row.
    ///
    /// Fails with `StoreError::DuplicateReference` when the reference id is taken.
    async fn insert_transaction(
        &mut self,
        transaction: &Transaction,
        request_hash: &str,
    ) -> Result<(), StoreError>;

    async fn insert_entry(&mut self, entry: &Entry) -> Result<(), StoreError>;

    async fn insert_outbox_event(&mut self, event: &NewOutboxEvent) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

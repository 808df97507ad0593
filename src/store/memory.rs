//! In-memory Ledger Store
//!
//! Test and development adapter. A unit of work stages its writes and applies
//! them under one lock on commit, re-checking the reference id the way the
//! unique index does in PostgreSQL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Account, AccountType, Entry, NewOutboxEvent, OutboxEvent, Transaction};
use crate::idempotency::IdempotencyRecord;

use super::{LedgerStore, OutboxClaim, StoreError, UnitOfWork};

#[derive(Debug, Clone)]
struct OutboxRow {
    event: OutboxEvent,
    claimed_by: Option<String>,
    claimed_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    transactions: HashMap<Uuid, Transaction>,
    references: HashMap<String, IdempotencyRecord>,
    entries: Vec<Entry>,
    outbox: Vec<OutboxRow>,
}

/// Ledger store held in process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
    unavailable: Arc<AtomicBool>,
    rejecting_writes: Arc<AtomicBool>,
}

fn lock_state(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
    state
        .lock()
        .map_err(|_| StoreError::Unavailable("in-memory state lock poisoned".into()))
}

/// Sum of an account's committed entries, widened so it cannot overflow
fn wide_balance(state: &MemoryState, account_id: Uuid) -> i128 {
    state
        .entries
        .iter()
        .filter(|e| e.account_id == account_id)
        .map(|e| i128::from(e.amount))
        .sum()
}

fn check_available(flag: &AtomicBool) -> Result<(), StoreError> {
    if flag.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable("in-memory store marked unavailable".into()));
    }
    Ok(())
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding only the `system_clearing` account, like a fresh migration
    pub fn seeded() -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.state.lock() {
            let clearing = Account::system_clearing();
            state.accounts.insert(clearing.id, clearing);
        }
        store
    }

    /// Simulate an outage: every operation fails with `StoreError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every commit fail with `StoreError::InvalidData`, as a database
    /// refusing the row contents would
    pub fn set_rejecting_writes(&self, rejecting: bool) {
        self.rejecting_writes.store(rejecting, Ordering::SeqCst);
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        check_available(&self.unavailable)?;
        lock_state(&self.state)
    }

    /// Number of committed transactions
    pub fn transaction_count(&self) -> usize {
        self.state.lock().map(|s| s.transactions.len()).unwrap_or(0)
    }

    /// Number of committed entries
    pub fn entry_count(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Snapshot of every outbox row in creation order
    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.state
            .lock()
            .map(|s| s.outbox.iter().map(|r| r.event.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.accounts.contains_key(&account.id) {
            return Err(StoreError::InvalidData(format!(
                "account {} already exists",
                account.id
            )));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.state()?.accounts.get(&id).cloned())
    }

    async fn find_account_by_owner(
        &self,
        owner_user_id: &str,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self
            .state()?
            .accounts
            .values()
            .filter(|a| {
                a.account_type == account_type && a.owner_user_id.as_deref() == Some(owner_user_id)
            })
            .min_by_key(|a| a.created_at)
            .cloned())
    }

    async fn account_balance(&self, account_id: Uuid) -> Result<i64, StoreError> {
        let balance = wide_balance(&*self.state()?, account_id);
        i64::try_from(balance).map_err(|_| {
            StoreError::InvalidData(format!("balance of account {} is out of range", account_id))
        })
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        Ok(self.state()?.transactions.get(&id).cloned())
    }

    async fn find_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.state()?.references.get(reference_id).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        check_available(&self.unavailable)?;
        Ok(Box::new(MemoryUnitOfWork {
            state: Arc::clone(&self.state),
            unavailable: Arc::clone(&self.unavailable),
            rejecting_writes: Arc::clone(&self.rejecting_writes),
            transaction: None,
            entries: Vec::new(),
            outbox: Vec::new(),
        }))
    }

    async fn claim_pending_events(
        &self,
        claim: &OutboxClaim,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let lease = chrono::Duration::from_std(claim.lease)
            .map_err(|e| StoreError::InvalidData(format!("invalid lease: {}", e)))?;
        let now = Utc::now();
        let limit = usize::try_from(claim.batch_size).unwrap_or(0);

        let mut state = self.state()?;
        let mut claimed = Vec::new();
        for row in state.outbox.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            let lease_free = row.claimed_until.map(|until| until < now).unwrap_or(true);
            if row.event.is_pending() && lease_free {
                row.claimed_by = Some(claim.instance_id.clone());
                row.claimed_until = Some(now + lease);
                claimed.push(row.event.clone());
            }
        }

        Ok(claimed)
    }

    async fn mark_event_processed(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let row = state
            .outbox
            .iter_mut()
            .find(|r| r.event.id == id)
            .ok_or_else(|| StoreError::InvalidData(format!("outbox event {} not found", id)))?;

        if row.event.processed_at.is_some() {
            return Ok(false);
        }
        row.event.processed_at = Some(Utc::now());
        row.claimed_until = None;
        Ok(true)
    }

    async fn release_claim(&self, id: Uuid, instance_id: &str) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if let Some(row) = state.outbox.iter_mut().find(|r| {
            r.event.id == id && r.event.is_pending() && r.claimed_by.as_deref() == Some(instance_id)
        }) {
            row.claimed_by = None;
            row.claimed_until = None;
        }
        Ok(())
    }

    async fn pending_event_count(&self) -> Result<i64, StoreError> {
        Ok(self
            .state()?
            .outbox
            .iter()
            .filter(|r| r.event.is_pending())
            .count() as i64)
    }
}

/// Staged writes of one in-memory unit of work
struct MemoryUnitOfWork {
    state: Arc<Mutex<MemoryState>>,
    unavailable: Arc<AtomicBool>,
    rejecting_writes: Arc<AtomicBool>,
    transaction: Option<(Transaction, String)>,
    entries: Vec<Entry>,
    outbox: Vec<NewOutboxEvent>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        check_available(&self.unavailable)?;
        Ok(lock_state(&self.state)?.references.get(reference_id).cloned())
    }

    async fn missing_accounts(&mut self, account_ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError> {
        check_available(&self.unavailable)?;
        let state = lock_state(&self.state)?;
        Ok(account_ids
            .iter()
            .filter(|id| !state.accounts.contains_key(id))
            .copied()
            .collect())
    }

    async fn balance_fits(&mut self, account_id: Uuid, delta: i64) -> Result<bool, StoreError> {
        check_available(&self.unavailable)?;
        let projected = wide_balance(&*lock_state(&self.state)?, account_id) + i128::from(delta);
        Ok(i64::try_from(projected).is_ok())
    }

    async fn insert_transaction(
        &mut self,
        transaction: &Transaction,
        request_hash: &str,
    ) -> Result<(), StoreError> {
        check_available(&self.unavailable)?;
        if lock_state(&self.state)?
            .references
            .contains_key(&transaction.reference_id)
        {
            return Err(StoreError::DuplicateReference(
                transaction.reference_id.clone(),
            ));
        }

        let mut staged = transaction.clone();
        staged.entries.clear();
        self.transaction = Some((staged, request_hash.to_string()));
        Ok(())
    }

    async fn insert_entry(&mut self, entry: &Entry) -> Result<(), StoreError> {
        check_available(&self.unavailable)?;
        match &self.transaction {
            Some((tx, _)) if tx.id == entry.transaction_id => {
                self.entries.push(entry.clone());
                Ok(())
            }
            _ => Err(StoreError::InvalidData(format!(
                "entry {} references an unknown transaction",
                entry.id
            ))),
        }
    }

    async fn insert_outbox_event(&mut self, event: &NewOutboxEvent) -> Result<(), StoreError> {
        check_available(&self.unavailable)?;
        self.outbox.push(event.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        check_available(&self.unavailable)?;
        if self.rejecting_writes.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidData("write rejected by store".into()));
        }
        let this = *self;
        let mut state = lock_state(&this.state)?;

        if let Some((mut transaction, request_hash)) = this.transaction {
            if state.references.contains_key(&transaction.reference_id) {
                return Err(StoreError::DuplicateReference(transaction.reference_id));
            }

            transaction.entries = this.entries.clone();
            state.references.insert(
                transaction.reference_id.clone(),
                IdempotencyRecord::new(transaction.reference_id.clone(), transaction.id, request_hash),
            );
            state.entries.extend(this.entries);
            state.transactions.insert(transaction.id, transaction);
        }

        let now = Utc::now();
        for event in this.outbox {
            state.outbox.push(OutboxRow {
                event: OutboxEvent {
                    id: event.id,
                    event_type: event.event_type,
                    payload: event.payload,
                    created_at: now,
                    processed_at: None,
                },
                claimed_by: None,
                claimed_until: None,
            });
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

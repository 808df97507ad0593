//! Domain module
//!
//! Core ledger types and validation rules.

pub mod account;
pub mod context;
pub mod error;
pub mod events;
pub mod transaction;

pub use account::{system_clearing_account_id, Account, AccountType, SYSTEM_CLEARING_ACCOUNT_ID};
pub use context::OperationContext;
pub use error::LedgerError;
pub use events::{
    EventEnvelope, LedgerEventType, NewOutboxEvent, OutboxEvent, PaymentEvent, PaymentSucceeded,
    RecordedEntry, TransactionRecorded,
};
pub use transaction::{
    account_deltas, checked_sum, validate_entries, Direction, Entry, EntryRequest, Transaction, MIN_ENTRIES,
};

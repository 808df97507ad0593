//! Command definitions
//!
//! Commands represent intentions to change the ledger.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AccountType, EntryRequest};

// =========================================================================
// Accounts
// =========================================================================

/// Command to open a new account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountCommand {
    pub name: String,
    pub account_type: AccountType,
    /// External user that owns a wallet account
    #[serde(default, alias = "user_id")]
    pub owner_user_id: Option<String>,
}

impl CreateAccountCommand {
    pub fn new(name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            name: name.into(),
            account_type,
            owner_user_id: None,
        }
    }

    pub fn with_owner(mut self, owner_user_id: impl Into<String>) -> Self {
        self.owner_user_id = Some(owner_user_id.into());
        self
    }
}

// =========================================================================
// Transactions
// =========================================================================

/// Command to record a balanced transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTransactionCommand {
    /// Caller-supplied idempotency key, unique across all transactions
    pub reference_id: String,
    #[serde(default)]
    pub description: String,
    pub entries: Vec<EntryRequest>,
}

impl RecordTransactionCommand {
    pub fn new(
        reference_id: impl Into<String>,
        description: impl Into<String>,
        entries: Vec<EntryRequest>,
    ) -> Self {
        Self {
            reference_id: reference_id.into(),
            description: description.into(),
            entries,
        }
    }
}

/// Result of recording a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTransactionResult {
    pub transaction_id: Uuid,
    /// True when the reference id was already recorded and nothing was written
    pub is_replay: bool,
}

impl RecordTransactionResult {
    pub fn recorded(transaction_id: Uuid) -> Self {
        Self {
            transaction_id,
            is_replay: false,
        }
    }

    pub fn replayed(transaction_id: Uuid) -> Self {
        Self {
            transaction_id,
            is_replay: true,
        }
    }
}

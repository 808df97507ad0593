//! Transactions and entries
//!
//! A transaction is a set of at least two entries whose signed amounts sum to
//! exactly zero. Amounts are integers in minor currency units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::LedgerError;

/// Minimum number of entries in a balanced transaction
pub const MIN_ENTRIES: usize = 2;

/// Side of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "debit",
            Direction::Credit => "credit",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(Direction::Debit),
            "credit" => Ok(Direction::Credit),
            other => Err(LedgerError::validation(format!(
                "unknown entry direction '{}'",
                other
            ))),
        }
    }
}

/// Requested entry, before it is assigned an id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRequest {
    pub account_id: Uuid,
    /// Signed amount in minor currency units
    pub amount: i64,
    pub direction: Direction,
}

impl EntryRequest {
    pub fn new(account_id: Uuid, amount: i64, direction: Direction) -> Self {
        Self {
            account_id,
            amount,
            direction,
        }
    }

    pub fn credit(account_id: Uuid, amount: i64) -> Self {
        Self::new(account_id, amount, Direction::Credit)
    }

    pub fn debit(account_id: Uuid, amount: i64) -> Self {
        Self::new(account_id, amount, Direction::Debit)
    }
}

/// Persisted entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub amount: i64,
    pub direction: Direction,
    /// Order of the entry inside its transaction
    pub position: i32,
}

/// Persisted transaction with its entries in creation order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub reference_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<Entry>,
}

impl Transaction {
    /// Materialize a transaction from validated entry requests.
    pub fn from_requests(
        reference_id: &str,
        description: &str,
        entries: &[EntryRequest],
    ) -> Self {
        let id = Uuid::new_v4();
        let entries = entries
            .iter()
            .enumerate()
            .map(|(position, e)| Entry {
                id: Uuid::new_v4(),
                transaction_id: id,
                account_id: e.account_id,
                amount: e.amount,
                direction: e.direction,
                position: position as i32,
            })
            .collect();

        Self {
            id,
            reference_id: reference_id.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            entries,
        }
    }

    /// Distinct accounts touched by this transaction, in first-seen order
    pub fn account_ids(&self) -> Vec<Uuid> {
        distinct_accounts(self.entries.iter().map(|e| e.account_id))
    }
}

/// Sum signed amounts, rejecting overflow.
pub fn checked_sum(entries: &[EntryRequest]) -> Result<i64, LedgerError> {
    entries.iter().try_fold(0i64, |acc, e| {
        acc.checked_add(e.amount)
            .ok_or_else(|| LedgerError::validation("entry amounts overflow"))
    })
}

/// Validate the shape of a transaction request.
///
/// Account existence is checked separately, inside the unit of work.
pub fn validate_entries(reference_id: &str, entries: &[EntryRequest]) -> Result<(), LedgerError> {
    if reference_id.trim().is_empty() {
        return Err(LedgerError::validation("reference_id is required"));
    }

    if entries.len() < MIN_ENTRIES {
        return Err(LedgerError::validation(format!(
            "at least {} entries are required, got {}",
            MIN_ENTRIES,
            entries.len()
        )));
    }

    let sum = checked_sum(entries)?;
    if sum != 0 {
        return Err(LedgerError::validation(format!(
            "transaction is not balanced: entries sum to {}",
            sum
        )));
    }

    Ok(())
}

/// Net signed amount per account, in first-seen order.
///
/// Overflow of one account's net is a `Validation` failure.
pub fn account_deltas(entries: &[EntryRequest]) -> Result<Vec<(Uuid, i64)>, LedgerError> {
    let mut deltas: Vec<(Uuid, i64)> = Vec::new();
    for entry in entries {
        match deltas.iter_mut().find(|(id, _)| *id == entry.account_id) {
            Some((_, net)) => {
                *net = net.checked_add(entry.amount).ok_or_else(|| {
                    LedgerError::validation(format!(
                        "entry amounts for account {} overflow",
                        entry.account_id
                    ))
                })?;
            }
            None => deltas.push((entry.account_id, entry.amount)),
        }
    }
    Ok(deltas)
}

pub(crate) fn distinct_accounts(ids: impl Iterator<Item = Uuid>) -> Vec<Uuid> {
    let mut seen = Vec::new();
    for id in ids {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}

//! Account types
//!
//! Accounts carry identity only. Their balance is always derived from the
//! entries that reference them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::LedgerError;

/// Fixed id of the seeded clearing account that offsets inbound payments
pub const SYSTEM_CLEARING_ACCOUNT_ID: &str = "00000000-0000-0000-0000-000000000001";

/// Kind of account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
    System,
    #[serde(alias = "user-wallet")]
    UserWallet,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Equity => "equity",
            AccountType::Revenue => "revenue",
            AccountType::Expense => "expense",
            AccountType::System => "system",
            AccountType::UserWallet => "user_wallet",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "asset" => Ok(AccountType::Asset),
            "liability" => Ok(AccountType::Liability),
            "equity" => Ok(AccountType::Equity),
            "revenue" => Ok(AccountType::Revenue),
            "expense" => Ok(AccountType::Expense),
            "system" => Ok(AccountType::System),
            "user_wallet" | "user-wallet" => Ok(AccountType::UserWallet),
            "" => Err(LedgerError::validation("account type is required")),
            other => Err(LedgerError::validation(format!(
                "unknown account type '{}'",
                other
            ))),
        }
    }
}

/// A ledger account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub account_type: AccountType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Build a new account, validating the name.
    pub fn new(
        name: impl Into<String>,
        account_type: AccountType,
        owner_user_id: Option<String>,
    ) -> Result<Self, LedgerError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(LedgerError::validation("account name is required"));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            name,
            account_type,
            owner_user_id: owner_user_id.filter(|u| !u.trim().is_empty()),
            created_at: Utc::now(),
        })
    }

    /// The seeded `system_clearing` account
    pub fn system_clearing() -> Self {
        Self {
            id: system_clearing_account_id(),
            name: "system_clearing".to_string(),
            account_type: AccountType::System,
            owner_user_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Id of the seeded clearing account
pub fn system_clearing_account_id() -> Uuid {
    Uuid::from_u128(1)
}

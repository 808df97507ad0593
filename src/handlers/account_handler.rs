//! Account Registry
//!
//! Creates and looks up accounts. Balances are never stored on the account;
//! they are delegated to the balance query service.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{Account, AccountType, LedgerError, OperationContext};
use crate::projection::BalanceQueryService;
use crate::store::LedgerStore;

use super::CreateAccountCommand;

/// Owns account identity
#[derive(Clone)]
pub struct AccountRegistry {
    store: Arc<dyn LedgerStore>,
    balances: BalanceQueryService,
}

impl AccountRegistry {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            balances: BalanceQueryService::new(Arc::clone(&store)),
            store,
        }
    }

    /// Open a new account
    pub async fn create_account(
        &self,
        command: CreateAccountCommand,
        context: &OperationContext,
    ) -> Result<Account, LedgerError> {
        let account = Account::new(command.name, command.account_type, command.owner_user_id)?;

        context
            .run(async {
                self.store.create_account(&account).await?;
                Ok(())
            })
            .await?;

        tracing::info!(
            account_id = %account.id,
            account_type = %account.account_type,
            owner_user_id = ?account.owner_user_id,
            correlation_id = ?context.correlation_id,
            "Account created"
        );

        Ok(account)
    }

    pub async fn get_account(
        &self,
        account_id: Uuid,
        context: &OperationContext,
    ) -> Result<Account, LedgerError> {
        context
            .run(async {
                self.store
                    .get_account(account_id)
                    .await?
                    .ok_or_else(|| LedgerError::not_found(format!("account {}", account_id)))
            })
            .await
    }

    /// Resolve an external user's wallet account
    pub async fn find_wallet(
        &self,
        owner_user_id: &str,
        context: &OperationContext,
    ) -> Result<Account, LedgerError> {
        context
            .run(async {
                self.store
                    .find_account_by_owner(owner_user_id, AccountType::UserWallet)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::not_found(format!("wallet for user {}", owner_user_id))
                    })
            })
            .await
    }

    /// Signed sum of the account's entries
    pub async fn get_balance(
        &self,
        account_id: Uuid,
        context: &OperationContext,
    ) -> Result<i64, LedgerError> {
        self.balances.get_balance(account_id, context).await
    }
}

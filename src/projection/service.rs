//! Balance Query Service
//!
//! Read-only, no locking. Reflects the latest committed state.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{LedgerError, OperationContext};
use crate::store::LedgerStore;

/// Derives account balances from entries
#[derive(Clone)]
pub struct BalanceQueryService {
    store: Arc<dyn LedgerStore>,
}

impl BalanceQueryService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Sum of the account's entry amounts; 0 for an account with no entries.
    ///
    /// An unknown account is `NotFound`, not a zero balance.
    pub async fn get_balance(
        &self,
        account_id: Uuid,
        context: &OperationContext,
    ) -> Result<i64, LedgerError> {
        context
            .run(async {
                if self.store.get_account(account_id).await?.is_none() {
                    return Err(LedgerError::not_found(format!("account {}", account_id)));
                }

                let balance = self.store.account_balance(account_id).await?;
                tracing::debug!(account_id = %account_id, balance = balance, "Balance derived");
                Ok(balance)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, AccountType, EntryRequest, NewOutboxEvent, Transaction};
    use crate::store::InMemoryLedgerStore;

    async fn commit(store: &InMemoryLedgerStore, tx: &Transaction) {
        let mut uow = store.begin().await.unwrap();
        uow.insert_transaction(tx, "hash").await.unwrap();
        for entry in &tx.entries {
            uow.insert_entry(entry).await.unwrap();
        }
        uow.insert_outbox_event(&NewOutboxEvent::transaction_recorded(tx).unwrap())
            .await
            .unwrap();
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let service = BalanceQueryService::new(Arc::new(InMemoryLedgerStore::new()));
        let result = service
            .get_balance(Uuid::new_v4(), &OperationContext::new())
            .await;
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_balance_sums_committed_entries() {
        let store = InMemoryLedgerStore::new();
        let a = Account::new("a", AccountType::Asset, None).unwrap();
        let b = Account::new("b", AccountType::Liability, None).unwrap();
        store.create_account(&a).await.unwrap();
        store.create_account(&b).await.unwrap();

        let service = BalanceQueryService::new(Arc::new(store.clone()));
        let ctx = OperationContext::new();
        assert_eq!(service.get_balance(a.id, &ctx).await.unwrap(), 0);

        for (i, amount) in [250, 750].into_iter().enumerate() {
            let tx = Transaction::from_requests(
                &format!("ref-{}", i),
                "",
                &[EntryRequest::credit(a.id, amount), EntryRequest::debit(b.id, -amount)],
            );
            commit(&store, &tx).await;
        }

        assert_eq!(service.get_balance(a.id, &ctx).await.unwrap(), 1000);
        assert_eq!(service.get_balance(b.id, &ctx).await.unwrap(), -1000);
    }

    #[tokio::test]
    async fn test_store_outage_is_transient() {
        let store = InMemoryLedgerStore::seeded();
        store.set_unavailable(true);
        let service = BalanceQueryService::new(Arc::new(store));

        let result = service
            .get_balance(crate::domain::system_clearing_account_id(), &OperationContext::new())
            .await;
        assert!(matches!(result, Err(LedgerError::TransientStorage(_))));
    }
}

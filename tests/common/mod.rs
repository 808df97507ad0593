//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use uuid::Uuid;

use ledger_core::domain::{system_clearing_account_id, Account, AccountType, EntryRequest};
use ledger_core::handlers::{AccountRegistry, RecordTransactionCommand, TransactionProcessor};
use ledger_core::store::{InMemoryLedgerStore, LedgerStore};
use ledger_core::{LedgerMetrics, OperationContext};

const SCHEMA: &str = include_str!("../../migrations/0001_ledger_core.sql");

/// Setup test database - apply the schema, truncate tables and seed the
/// clearing account
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    pool.execute(SCHEMA).await.expect("Failed to apply schema");

    pool.execute("TRUNCATE TABLE outbox_events, entries, transactions, accounts CASCADE")
        .await
        .expect("Failed to clean up DB");

    // Re-running the schema re-seeds the clearing account
    pool.execute(SCHEMA).await.expect("Failed to seed clearing account");

    pool
}

/// In-memory ledger wired the way the service wires PostgreSQL
pub struct MemoryLedger {
    pub store: InMemoryLedgerStore,
    pub shared: Arc<dyn LedgerStore>,
    pub metrics: LedgerMetrics,
    pub registry: AccountRegistry,
    pub processor: TransactionProcessor,
}

impl MemoryLedger {
    pub fn new() -> Self {
        let store = InMemoryLedgerStore::seeded();
        let shared: Arc<dyn LedgerStore> = Arc::new(store.clone());
        let metrics = LedgerMetrics::new().expect("metrics registry");
        Self {
            registry: AccountRegistry::new(Arc::clone(&shared)),
            processor: TransactionProcessor::new(Arc::clone(&shared), metrics.clone()),
            store,
            shared,
            metrics,
        }
    }

    pub async fn account(&self, name: &str, account_type: AccountType, owner: Option<&str>) -> Account {
        let account = Account::new(name, account_type, owner.map(str::to_string))
            .expect("valid account");
        self.shared
            .create_account(&account)
            .await
            .expect("create account");
        account
    }

    pub async fn balance(&self, account_id: Uuid) -> i64 {
        self.registry
            .get_balance(account_id, &OperationContext::new())
            .await
            .expect("balance")
    }
}

/// `[{wallet, +amount, credit}, {system_clearing, -amount, debit}]`
pub fn payment_command(reference: &str, wallet_id: Uuid, credit: i64, debit: i64) -> RecordTransactionCommand {
    RecordTransactionCommand::new(
        reference,
        "test",
        vec![
            EntryRequest::credit(wallet_id, credit),
            EntryRequest::debit(system_clearing_account_id(), debit),
        ],
    )
}

pub fn payment_succeeded(payment_id: &str, user_id: &str, amount: i64) -> Vec<u8> {
    serde_json::json!({
        "id": format!("evt_{}", payment_id),
        "type": "payment.succeeded",
        "timestamp": "2026-01-01T00:00:00Z",
        "payload": {
            "id": payment_id,
            "user_id": user_id,
            "amount": amount,
            "currency": "USD"
        }
    })
    .to_string()
    .into_bytes()
}

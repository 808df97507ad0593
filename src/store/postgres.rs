//! PostgreSQL Ledger Store
//!
//! Production adapter. Every unit of work is one database transaction; the
//! unique index on `transactions.reference_id` settles concurrent duplicates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction as PgTransaction};
use uuid::Uuid;

use crate::domain::{
    Account, AccountType, Direction, Entry, NewOutboxEvent, OutboxEvent, Transaction,
};
use crate::idempotency::IdempotencyRecord;

use super::{LedgerStore, OutboxClaim, StoreError, UnitOfWork};

type AccountRow = (Uuid, String, String, Option<String>, DateTime<Utc>);
type EntryRow = (Uuid, Uuid, Uuid, i64, String, i32);
type OutboxRow = (Uuid, String, Vec<u8>, DateTime<Utc>, Option<DateTime<Utc>>);

/// Ledger store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Create a new PgLedgerStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn account_from_row(
    (id, name, account_type, owner_user_id, created_at): AccountRow,
) -> Result<Account, StoreError> {
    let account_type: AccountType = account_type
        .parse()
        .map_err(|_| StoreError::InvalidData(format!("account {} has type '{}'", id, account_type)))?;

    Ok(Account {
        id,
        name,
        account_type,
        owner_user_id,
        created_at,
    })
}

fn entry_from_row(
    (id, transaction_id, account_id, amount, direction, position): EntryRow,
) -> Result<Entry, StoreError> {
    let direction: Direction = direction
        .parse()
        .map_err(|_| StoreError::InvalidData(format!("entry {} has direction '{}'", id, direction)))?;

    Ok(Entry {
        id,
        transaction_id,
        account_id,
        amount,
        direction,
        position,
    })
}

fn outbox_from_row(
    (id, event_type, payload, created_at, processed_at): OutboxRow,
) -> OutboxEvent {
    OutboxEvent {
        id,
        event_type,
        payload,
        created_at,
        processed_at,
    }
}

fn is_reference_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation()
                && db_err
                    .constraint()
                    .map(|c| c.contains("reference_id"))
                    .unwrap_or(true)
        }
        _ => false,
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, name, account_type, user_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(account.account_type.as_str())
        .bind(&account.owner_user_id)
        .bind(account.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, name, account_type, user_id, created_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(account_from_row).transpose()
    }

    async fn find_account_by_owner(
        &self,
        owner_user_id: &str,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, name, account_type, user_id, created_at
            FROM accounts
            WHERE user_id = $1 AND account_type = $2
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(owner_user_id)
        .bind(account_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(account_from_row).transpose()
    }

    async fn account_balance(&self, account_id: Uuid) -> Result<i64, StoreError> {
        // SUM over BIGINT is NUMERIC; NULL here means it does not fit in BIGINT
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT CASE
                WHEN total BETWEEN -9223372036854775808 AND 9223372036854775807
                THEN total::BIGINT
            END
            FROM (
                SELECT COALESCE(SUM(amount), 0) AS total
                FROM entries
                WHERE account_id = $1
            ) AS t
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        balance.ok_or_else(|| {
            StoreError::InvalidData(format!("balance of account {} is out of range", account_id))
        })
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let row: Option<(Uuid, String, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, reference_id, description, created_at
            FROM transactions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, reference_id, description, created_at)) = row else {
            return Ok(None);
        };

        let entries = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, transaction_id, account_id, amount, direction, position
            FROM entries
            WHERE transaction_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(entry_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Transaction {
            id,
            reference_id,
            description,
            created_at,
            entries,
        }))
    }

    async fn find_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row: Option<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, request_hash FROM transactions WHERE reference_id = $1
            "#,
        )
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, hash)| IdempotencyRecord::new(reference_id, id, hash)))
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn claim_pending_events(
        &self,
        claim: &OutboxClaim,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        // SKIP LOCKED keeps concurrent publishers on disjoint rows; the lease
        // keeps the rows theirs after this statement commits.
        let mut events: Vec<OutboxEvent> = sqlx::query_as::<_, OutboxRow>(
            r#"
            UPDATE outbox_events
            SET claimed_by = $1,
                claimed_until = NOW() + make_interval(secs => $2)
            WHERE id IN (
                SELECT id FROM outbox_events
                WHERE processed_at IS NULL
                  AND (claimed_until IS NULL OR claimed_until < NOW())
                ORDER BY created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, event_type, payload, created_at, processed_at
            "#,
        )
        .bind(&claim.instance_id)
        .bind(claim.lease.as_secs_f64())
        .bind(claim.batch_size)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(outbox_from_row)
        .collect();

        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    async fn mark_event_processed(&self, id: Uuid) -> Result<bool, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed_at = NOW(), claimed_until = NULL
            WHERE id = $1 AND processed_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    async fn release_claim(&self, id: Uuid, instance_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET claimed_by = NULL, claimed_until = NULL
            WHERE id = $1 AND claimed_by = $2 AND processed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn pending_event_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM outbox_events WHERE processed_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

/// Unit of work over one PostgreSQL transaction
pub struct PgUnitOfWork {
    tx: PgTransaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_by_reference(
        &mut self,
        reference_id: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row: Option<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, request_hash FROM transactions WHERE reference_id = $1
            "#,
        )
        .bind(reference_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|(id, hash)| IdempotencyRecord::new(reference_id, id, hash)))
    }

    async fn missing_accounts(&mut self, account_ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError> {
        let found: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM accounts WHERE id = ANY($1)
            "#,
        )
        .bind(account_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(account_ids
            .iter()
            .filter(|id| !found.contains(id))
            .copied()
            .collect())
    }

    async fn balance_fits(&mut self, account_id: Uuid, delta: i64) -> Result<bool, StoreError> {
        let fits: bool = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0) + $2::NUMERIC
                BETWEEN -9223372036854775808 AND 9223372036854775807
            FROM entries
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .bind(delta)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(fits)
    }

    async fn insert_transaction(
        &mut self,
        transaction: &Transaction,
        request_hash: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (id, reference_id, description, request_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(transaction.id)
        .bind(&transaction.reference_id)
        .bind(&transaction.description)
        .bind(request_hash)
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_reference_conflict(&e) => Err(StoreError::DuplicateReference(
                transaction.reference_id.clone(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_entry(&mut self, entry: &Entry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO entries (id, transaction_id, account_id, amount, direction, position)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.transaction_id)
        .bind(entry.account_id)
        .bind(entry.amount)
        .bind(entry.direction.as_str())
        .bind(entry.position)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_outbox_event(&mut self, event: &NewOutboxEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, event_type, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

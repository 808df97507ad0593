//! Database module
//!
//! Startup schema checks. The schema itself lives in raw SQL files
//! under migrations/.

use sqlx::PgPool;
use uuid::Uuid;

/// Tables the ledger needs
const REQUIRED_TABLES: [&str; 4] = ["accounts", "transactions", "entries", "outbox_events"];

/// Check that the required tables and the clearing account exist
pub async fn check_schema(pool: &PgPool, clearing_account_id: Uuid) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(table = table, "Required table does not exist");
            return Ok(false);
        }
    }

    check_clearing_account(pool, clearing_account_id).await
}

async fn check_clearing_account(pool: &PgPool, account_id: Uuid) -> Result<bool, sqlx::Error> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE id = $1)")
        .bind(account_id)
        .fetch_one(pool)
        .await?;

    if !exists {
        tracing::error!(
            account_id = %account_id,
            "Clearing account does not exist. Please run database migrations."
        );
        return Ok(false);
    }

    tracing::info!(account_id = %account_id, "Clearing account verified");
    Ok(true)
}

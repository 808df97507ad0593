//! API Routes
//!
//! HTTP endpoint definitions. Handlers translate requests into ledger calls
//! and nothing more.

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Account, AccountType, OperationContext, Transaction};
use crate::error::AppError;
use crate::handlers::{CreateAccountCommand, RecordTransactionCommand, RecordTransactionResult};

use super::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    /// Parsed by the ledger so that empty and unknown types are validation errors
    #[serde(rename = "type", alias = "account_type", default)]
    pub account_type: String,
    #[serde(default, alias = "user_id")]
    pub owner_user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: Uuid,
    pub balance: i64,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router (mounted under /api/v1)
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/:account_id", get(get_account))
        .route("/accounts/:account_id/balance", get(get_balance))
        .route("/transactions", post(record_transaction))
        .route("/transactions/:transaction_id", get(get_transaction))
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::InvalidRequest(rejection.body_text()))
}

// =========================================================================
// Accounts
// =========================================================================

async fn create_account(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    body: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let request = json_body(body)?;
    let account_type: AccountType = request.account_type.parse()?;

    let command = CreateAccountCommand {
        name: request.name,
        account_type,
        owner_user_id: request.owner_user_id,
    };

    let account = state.registry.create_account(command, &context).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_account(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Account>, AppError> {
    let account = state.registry.get_account(account_id, &context).await?;
    Ok(Json(account))
}

async fn get_balance(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state.balances.get_balance(account_id, &context).await?;
    Ok(Json(BalanceResponse {
        account_id,
        balance,
    }))
}

// =========================================================================
// Transactions
// =========================================================================

/// 201 when recorded, 200 when the reference id was already recorded
async fn record_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    body: Result<Json<RecordTransactionCommand>, JsonRejection>,
) -> Result<(StatusCode, Json<RecordTransactionResult>), AppError> {
    let command = json_body(body)?;
    let result = state.processor.record_transaction(command, &context).await?;

    let status = if result.is_replay {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(result)))
}

async fn get_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    let transaction = state
        .processor
        .get_transaction(transaction_id, &context)
        .await?;
    Ok(Json(transaction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_account_request_deserialize() {
        let json = r#"{"name": "alice", "type": "user-wallet", "user_id": "u1"}"#;
        let request: CreateAccountRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.name, "alice");
        assert_eq!(request.account_type, "user-wallet");
        assert_eq!(request.owner_user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_create_account_request_missing_type_defaults_empty() {
        let request: CreateAccountRequest = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert!(request.account_type.is_empty());
    }

    #[test]
    fn test_record_transaction_request_deserialize() {
        let json = r#"{
            "reference_id": "pay_1",
            "description": "test",
            "entries": [
                {"account_id": "00000000-0000-0000-0000-000000000002", "amount": 1000, "direction": "credit"},
                {"account_id": "00000000-0000-0000-0000-000000000001", "amount": -1000, "direction": "debit"}
            ]
        }"#;
        let command: RecordTransactionCommand = serde_json::from_str(json).unwrap();

        assert_eq!(command.reference_id, "pay_1");
        assert_eq!(command.entries.len(), 2);
        assert_eq!(command.entries[1].amount, -1000);
    }
}

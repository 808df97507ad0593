//! API Integration Tests
//!
//! Drive the router with `oneshot` over the in-memory store.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use ledger_core::api::{self, AppState};
use ledger_core::domain::SYSTEM_CLEARING_ACCOUNT_ID;
use ledger_core::store::{InMemoryLedgerStore, LedgerStore};
use ledger_core::LedgerMetrics;

fn app() -> (Router, InMemoryLedgerStore) {
    let store = InMemoryLedgerStore::seeded();
    let shared: Arc<dyn LedgerStore> = Arc::new(store.clone());
    let state = AppState::new(shared, LedgerMetrics::new().unwrap());
    (api::build_router(state), store)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let req = match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn pay(reference: &str, wallet: &str, credit: i64, debit: i64) -> Value {
    json!({
        "reference_id": reference,
        "description": "test",
        "entries": [
            {"account_id": wallet, "amount": credit, "direction": "credit"},
            {"account_id": SYSTEM_CLEARING_ACCOUNT_ID, "amount": debit, "direction": "debit"}
        ]
    })
}

#[tokio::test]
async fn test_payment_scenario_e2e() {
    let (app, store) = app();

    // 1. Create alice's wallet
    let (status, alice) = send(
        &app,
        "POST",
        "/api/v1/accounts",
        Some(json!({"name": "alice", "type": "user-wallet", "user_id": "u1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "wallet creation failed");
    let alice_id = alice["id"].as_str().unwrap().to_string();
    assert_eq!(alice["account_type"], "user_wallet");

    // 2. Record pay_1
    let (status, first) = send(&app, "POST", "/api/v1/transactions", Some(pay("pay_1", &alice_id, 1000, -1000))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["is_replay"], false);

    // 3. Replay pay_1
    let (status, replay) = send(&app, "POST", "/api/v1/transactions", Some(pay("pay_1", &alice_id, 1000, -1000))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["is_replay"], true);
    assert_eq!(replay["transaction_id"], first["transaction_id"]);

    // 4. Balances
    let (status, balance) = send(&app, "GET", &format!("/api/v1/accounts/{}/balance", alice_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(balance["balance"], 1000);

    let (_, clearing) = send(
        &app,
        "GET",
        &format!("/api/v1/accounts/{}/balance", SYSTEM_CLEARING_ACCOUNT_ID),
        None,
    )
    .await;
    assert_eq!(clearing["balance"], -1000);
    assert_eq!(store.outbox_events().len(), 1);

    // 5. pay_2 is unbalanced
    let (status, error) = send(&app, "POST", "/api/v1/transactions", Some(pay("pay_2", &alice_id, 500, -400))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error_code"], "validation_error");
    assert!(store.find_by_reference("pay_2").await.unwrap().is_none());
    assert_eq!(store.outbox_events().len(), 1);

    // 6. Read back pay_1
    let tx_id = first["transaction_id"].as_str().unwrap();
    let (status, tx) = send(&app, "GET", &format!("/api/v1/transactions/{}", tx_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tx["reference_id"], "pay_1");
    assert_eq!(tx["entries"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_account_type_is_rejected() {
    let (app, _) = app();
    let (status, error) = send(
        &app,
        "POST",
        "/api/v1/accounts",
        Some(json!({"name": "x", "type": "savings"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error_code"], "validation_error");
}

#[tokio::test]
async fn test_missing_records_are_not_found() {
    let (app, _) = app();
    let id = Uuid::new_v4();

    for uri in [
        format!("/api/v1/accounts/{}", id),
        format!("/api/v1/accounts/{}/balance", id),
        format!("/api/v1/transactions/{}", id),
    ] {
        let (status, error) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(error["error_code"], "not_found");
    }
}

#[tokio::test]
async fn test_malformed_body_is_invalid_request() {
    let (app, _) = app();
    let (status, error) = send(
        &app,
        "POST",
        "/api/v1/transactions",
        Some(json!({"reference_id": "x", "entries": "nope"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error_code"], "invalid_request");
}

#[tokio::test]
async fn test_correlation_id_is_echoed() {
    let (app, _) = app();
    let id = Uuid::new_v4();
    let req = Request::builder()
        .uri(format!("/api/v1/accounts/{}", Uuid::new_v4()))
        .header("X-Correlation-Id", id.to_string())
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(
        response.headers().get("x-correlation-id").unwrap(),
        id.to_string().as_str()
    );
}

#[tokio::test]
async fn test_invalid_timeout_header_is_bad_request() {
    let (app, _) = app();
    let req = Request::builder()
        .uri(format!("/api/v1/accounts/{}", Uuid::new_v4()))
        .header("X-Request-Timeout-Ms", "-5")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (app, _) = app();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("ledger_outbox_lag_total"));
}

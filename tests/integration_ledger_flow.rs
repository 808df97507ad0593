//! Ledger Flow Tests
//!
//! Payment stream -> consumer -> processor -> outbox -> ledger event stream,
//! all over the in-memory adapters.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ledger_core::bus::{InMemoryBus, MessageSource};
use ledger_core::consumer::{MessageOutcome, PaymentConsumerConfig, PaymentEventConsumer};
use ledger_core::domain::{
    system_clearing_account_id, AccountType, EventEnvelope, TransactionRecorded,
};
use ledger_core::outbox::{OutboxPublisher, OutboxPublisherConfig};
use ledger_core::OperationContext;

mod common;

use common::{payment_command, payment_succeeded, MemoryLedger};

fn consumer(ledger: &MemoryLedger, bus: &Arc<InMemoryBus>) -> PaymentEventConsumer {
    PaymentEventConsumer::new(
        bus.clone(),
        ledger.registry.clone(),
        ledger.processor.clone(),
        ledger.metrics.clone(),
        PaymentConsumerConfig {
            block_for: Duration::from_millis(5),
            retry_backoff: Duration::from_millis(5),
            ..PaymentConsumerConfig::default()
        },
    )
}

fn publisher(ledger: &MemoryLedger, bus: &Arc<InMemoryBus>, instance: &str) -> OutboxPublisher {
    OutboxPublisher::with_config(
        Arc::clone(&ledger.shared),
        bus.clone(),
        ledger.metrics.clone(),
        OutboxPublisherConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 2,
            instance_id: instance.to_string(),
            ..OutboxPublisherConfig::default()
        },
    )
}

#[tokio::test]
async fn test_pay_1_and_pay_2_scenarios() {
    let ledger = MemoryLedger::new();
    let alice = ledger.account("alice", AccountType::UserWallet, Some("alice")).await;
    let ctx = OperationContext::new();

    let first = ledger
        .processor
        .record_transaction(payment_command("pay_1", alice.id, 1000, -1000), &ctx)
        .await
        .unwrap();
    assert!(!first.is_replay);
    assert_eq!(ledger.balance(alice.id).await, 1000);
    assert_eq!(ledger.balance(system_clearing_account_id()).await, -1000);
    assert_eq!(ledger.store.outbox_events().len(), 1);

    let again = ledger
        .processor
        .record_transaction(payment_command("pay_1", alice.id, 1000, -1000), &ctx)
        .await
        .unwrap();
    assert!(again.is_replay);
    assert_eq!(again.transaction_id, first.transaction_id);
    assert_eq!(ledger.balance(alice.id).await, 1000);
    assert_eq!(ledger.store.outbox_events().len(), 1);

    let rejected = ledger
        .processor
        .record_transaction(payment_command("pay_2", alice.id, 500, -400), &ctx)
        .await;
    assert!(matches!(rejected, Err(ledger_core::LedgerError::Validation(_))));
    assert_eq!(ledger.store.transaction_count(), 1);
    assert_eq!(ledger.store.entry_count(), 2);
    assert_eq!(ledger.balance(alice.id).await, 1000);
}

#[tokio::test]
async fn test_redelivered_payment_publishes_one_ledger_event() {
    let ledger = MemoryLedger::new();
    let alice = ledger.account("alice", AccountType::UserWallet, Some("u1")).await;
    let payments = Arc::new(InMemoryBus::new());
    let ledger_events = Arc::new(InMemoryBus::new());

    payments.push(payment_succeeded("pay_1", "u1", 1000));
    payments.push(payment_succeeded("pay_1", "u1", 1000));

    let consumer = consumer(&ledger, &payments);
    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let delivery = payments.receive(1, Duration::ZERO).await.unwrap().remove(0);
        outcomes.push(consumer.handle(&delivery).await);
    }
    assert!(matches!(outcomes[0], MessageOutcome::Recorded(_)));
    assert!(matches!(outcomes[1], MessageOutcome::Replayed(_)));

    let report = publisher(&ledger, &ledger_events, "p1").run_cycle().await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(report.pending, 0);

    let published = ledger_events.published();
    assert_eq!(published.len(), 1);
    let envelope: EventEnvelope<TransactionRecorded> =
        serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(envelope.event_type, "ledger.transaction.recorded");
    assert_eq!(envelope.payload.reference_id, "pay_1");
    assert_eq!(ledger.balance(alice.id).await, 1000);
}

#[tokio::test]
async fn test_every_recorded_transaction_is_eventually_published_once() {
    let ledger = MemoryLedger::new();
    let alice = ledger.account("alice", AccountType::UserWallet, Some("u1")).await;
    let ledger_events = Arc::new(InMemoryBus::new());
    let ctx = OperationContext::new();

    let mut transaction_ids = HashSet::new();
    for i in 0..7 {
        let result = ledger
            .processor
            .record_transaction(payment_command(&format!("pay_{}", i), alice.id, 10, -10), &ctx)
            .await
            .unwrap();
        transaction_ids.insert(result.transaction_id);
    }

    // Two publishers with small batches and an outage in the middle
    let a = publisher(&ledger, &ledger_events, "a");
    let b = publisher(&ledger, &ledger_events, "b");
    a.run_cycle().await.unwrap();
    ledger_events.set_publish_unavailable(true);
    b.run_cycle().await.unwrap();
    ledger_events.set_publish_unavailable(false);

    for _ in 0..10 {
        let report_a = a.run_cycle().await.unwrap();
        let report_b = b.run_cycle().await.unwrap();
        if report_a.pending == 0 && report_b.pending == 0 {
            break;
        }
    }

    assert!(ledger.store.outbox_events().iter().all(|e| !e.is_pending()));
    assert_eq!(ledger.metrics.outbox_lag.get(), 0);

    let published: HashSet<_> = ledger_events
        .published()
        .iter()
        .map(|(_, payload)| {
            serde_json::from_slice::<EventEnvelope<TransactionRecorded>>(payload)
                .unwrap()
                .payload
                .transaction_id
        })
        .collect();
    assert_eq!(published, transaction_ids);
    assert_eq!(ledger_events.published().len(), transaction_ids.len());
}

#[tokio::test]
async fn test_background_loops_shut_down_cleanly() {
    let ledger = MemoryLedger::new();
    let alice = ledger.account("alice", AccountType::UserWallet, Some("u1")).await;
    let payments = Arc::new(InMemoryBus::new());
    let ledger_events = Arc::new(InMemoryBus::new());

    for i in 0..3 {
        payments.push(payment_succeeded(&format!("pay_{}", i), "u1", 100));
    }
    payments.push(b"not an envelope".to_vec());

    let shutdown = CancellationToken::new();
    let consumer_task = consumer(&ledger, &payments).start(shutdown.clone());
    let publisher_task = publisher(&ledger, &ledger_events, "p1").start(shutdown.clone());

    for _ in 0..200 {
        if ledger_events.published().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), consumer_task)
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), publisher_task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(ledger_events.published().len(), 3);
    assert_eq!(payments.dead_letters().len(), 1);
    assert_eq!(payments.unacknowledged(), 0);
    assert_eq!(ledger.balance(alice.id).await, 300);
}

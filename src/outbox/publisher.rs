//! Outbox Publisher
//!
//! Periodic background task. Each cycle claims the oldest pending events,
//! appends each payload to the outbound stream keyed by the event id and
//! marks the row processed. A failed publish releases the claim and leaves
//! the row pending for the next cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::EventPublisher;
use crate::domain::{LedgerError, OutboxEvent};
use crate::metrics::LedgerMetrics;
use crate::store::{LedgerStore, OutboxClaim};

/// Configuration for the outbox publisher
#[derive(Debug, Clone)]
pub struct OutboxPublisherConfig {
    /// Time between cycles (default: 2 seconds)
    pub poll_interval: Duration,
    /// Maximum events claimed per cycle (default: 100)
    pub batch_size: i64,
    /// How long a claim stays exclusive to this instance (default: 30 seconds)
    pub lease: Duration,
    /// Identifies this publisher in `outbox_events.claimed_by`
    pub instance_id: String,
}

impl Default for OutboxPublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 100,
            lease: Duration::from_secs(30),
            instance_id: format!("publisher-{}", Uuid::new_v4()),
        }
    }
}

/// Report from one publisher cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
    /// Events still pending after the cycle
    pub pending: i64,
}

/// Outbox Publisher - the only writer of `processed_at`
pub struct OutboxPublisher {
    store: Arc<dyn LedgerStore>,
    bus: Arc<dyn EventPublisher>,
    metrics: LedgerMetrics,
    config: OutboxPublisherConfig,
}

impl OutboxPublisher {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        bus: Arc<dyn EventPublisher>,
        metrics: LedgerMetrics,
    ) -> Self {
        Self::with_config(store, bus, metrics, OutboxPublisherConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(
        store: Arc<dyn LedgerStore>,
        bus: Arc<dyn EventPublisher>,
        metrics: LedgerMetrics,
        config: OutboxPublisherConfig,
    ) -> Self {
        Self {
            store,
            bus,
            metrics,
            config,
        }
    }

    /// Start the publisher in the background.
    ///
    /// The loop stops taking new cycles once `shutdown` is cancelled; a cycle
    /// already running is finished first.
    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            instance_id = %self.config.instance_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox publisher started"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        tracing::error!(error = %e, "Outbox publisher cycle failed");
                    }
                }
            }
        }

        tracing::info!(instance_id = %self.config.instance_id, "Outbox publisher stopped");
    }

    /// Run one claim/publish/mark cycle (also used for manual trigger or testing)
    pub async fn run_cycle(&self) -> Result<CycleReport, LedgerError> {
        let claim = OutboxClaim {
            instance_id: self.config.instance_id.clone(),
            batch_size: self.config.batch_size,
            lease: self.config.lease,
        };

        let events = self.store.claim_pending_events(&claim).await?;
        let mut report = CycleReport {
            claimed: events.len(),
            ..CycleReport::default()
        };

        let mut remaining = events.iter();
        while let Some(event) = remaining.next() {
            match self.bus.publish(&event.id.to_string(), &event.payload).await {
                Ok(()) => {
                    self.mark_processed(event).await;
                    report.published += 1;
                }
                Err(e) => {
                    let err = LedgerError::from(e);
                    self.metrics.outbox_publish_failures.inc();
                    tracing::warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %err,
                        "Outbox publish failed; event stays pending"
                    );

                    // Stop here so later events are not delivered ahead of
                    // this one; the whole rest of the batch goes back.
                    for unpublished in std::iter::once(event).chain(remaining.by_ref()) {
                        self.release(unpublished).await;
                        report.failed += 1;
                    }
                }
            }
        }

        report.pending = self.store.pending_event_count().await?;
        self.metrics.outbox_lag.set(report.pending);

        if report.claimed > 0 {
            tracing::debug!(
                claimed = report.claimed,
                published = report.published,
                failed = report.failed,
                pending = report.pending,
                "Outbox cycle complete"
            );
        }

        Ok(report)
    }

    async fn mark_processed(&self, event: &OutboxEvent) {
        self.metrics.outbox_published.inc();
        match self.store.mark_event_processed(event.id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(event_id = %event.id, "Outbox event was already processed");
            }
            // The lease expires and the event is published again.
            Err(e) => tracing::error!(
                event_id = %event.id,
                error = %e,
                "Published outbox event could not be marked processed"
            ),
        }
    }

    async fn release(&self, event: &OutboxEvent) {
        if let Err(e) = self
            .store
            .release_claim(event.id, &self.config.instance_id)
            .await
        {
            tracing::warn!(event_id = %event.id, error = %e, "Failed to release outbox claim");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::domain::{
        system_clearing_account_id, Account, AccountType, EntryRequest, EventEnvelope,
        OperationContext, TransactionRecorded,
    };
    use crate::handlers::{RecordTransactionCommand, TransactionProcessor};
    use crate::store::InMemoryLedgerStore;

    struct Fixture {
        store: InMemoryLedgerStore,
        bus: Arc<InMemoryBus>,
        metrics: LedgerMetrics,
        processor: TransactionProcessor,
        wallet: Account,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryLedgerStore::seeded();
        let wallet = Account::new("w", AccountType::UserWallet, Some("u1".into())).unwrap();
        store.create_account(&wallet).await.unwrap();
        let metrics = LedgerMetrics::new().unwrap();
        Fixture {
            processor: TransactionProcessor::new(Arc::new(store.clone()), metrics.clone()),
            bus: Arc::new(InMemoryBus::new()),
            store,
            metrics,
            wallet,
        }
    }

    impl Fixture {
        fn publisher(&self) -> OutboxPublisher {
            OutboxPublisher::with_config(
                Arc::new(self.store.clone()),
                self.bus.clone(),
                self.metrics.clone(),
                OutboxPublisherConfig {
                    poll_interval: Duration::from_millis(10),
                    ..OutboxPublisherConfig::default()
                },
            )
        }

        async fn record(&self, reference: &str) {
            self.processor
                .record_transaction(
                    RecordTransactionCommand::new(
                        reference,
                        "",
                        vec![
                            EntryRequest::credit(self.wallet.id, 10),
                            EntryRequest::debit(system_clearing_account_id(), -10),
                        ],
                    ),
                    &OperationContext::new(),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_cycle_publishes_in_order_and_marks_processed() {
        let f = fixture().await;
        f.record("a").await;
        f.record("b").await;

        let report = f.publisher().run_cycle().await.unwrap();
        assert_eq!(
            report,
            CycleReport {
                claimed: 2,
                published: 2,
                failed: 0,
                pending: 0
            }
        );

        let events = f.store.outbox_events();
        let published = f.bus.published();
        assert_eq!(published.len(), 2);
        for (event, (key, payload)) in events.iter().zip(&published) {
            assert!(!event.is_pending());
            assert_eq!(key, &event.id.to_string());
            let envelope: EventEnvelope<TransactionRecorded> =
                serde_json::from_slice(payload).unwrap();
            assert_eq!(envelope.id, event.id.to_string());
        }
        assert_eq!(f.metrics.outbox_lag.get(), 0);
        assert_eq!(f.metrics.outbox_published.get(), 2);
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_event_pending_until_broker_returns() {
        let f = fixture().await;
        f.record("a").await;
        let publisher = f.publisher();

        f.bus.set_publish_unavailable(true);
        let report = publisher.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.pending, 1);
        assert_eq!(f.metrics.outbox_lag.get(), 1);
        assert_eq!(f.metrics.outbox_publish_failures.get(), 1);
        assert!(f.store.outbox_events()[0].is_pending());

        f.bus.set_publish_unavailable(false);
        let report = publisher.run_cycle().await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(report.pending, 0);
        assert_eq!(f.bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_outbox_cycle_is_a_no_op() {
        let f = fixture().await;
        let report = f.publisher().run_cycle().await.unwrap();
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test]
    async fn test_started_publisher_drains_and_stops_on_shutdown() {
        let f = fixture().await;
        f.record("a").await;

        let shutdown = CancellationToken::new();
        let handle = f.publisher().start(shutdown.clone());

        for _ in 0..100 {
            if f.bus.published().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.bus.published().len(), 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_publisher_config_default() {
        let config = OutboxPublisherConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.lease, Duration::from_secs(30));
        assert!(config.instance_id.starts_with("publisher-"));
    }
}

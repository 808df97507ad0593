//! Ledger Metrics
//!
//! Named counters, histograms and gauges the core emits. Each instance owns
//! its own registry and is handed to components through their constructors.

use std::fmt;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Outcome label values for `ledger_transactions_recorded_total`
pub mod status {
    pub const RECORDED: &str = "recorded";
    pub const REPLAYED: &str = "replayed";
    pub const REJECTED: &str = "rejected";
    pub const FAILED: &str = "failed";
}

/// Outcome label values for `ledger_payment_messages_total`
pub mod outcome {
    pub const RECORDED: &str = "recorded";
    pub const REPLAYED: &str = "replayed";
    pub const IGNORED: &str = "ignored";
    pub const DEAD_LETTERED: &str = "dead_lettered";
    pub const RETRY: &str = "retry";
}

/// Metrics sink shared by the ledger components
#[derive(Clone)]
pub struct LedgerMetrics {
    registry: Registry,
    pub transactions_recorded: IntCounterVec,
    pub transaction_latency: Histogram,
    pub outbox_lag: IntGauge,
    pub outbox_published: IntCounter,
    pub outbox_publish_failures: IntCounter,
    pub payment_messages: IntCounterVec,
}

impl LedgerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let transactions_recorded = IntCounterVec::new(
            Opts::new(
                "ledger_transactions_recorded_total",
                "Total number of ledger transaction requests by outcome.",
            ),
            &["status"],
        )?;
        let transaction_latency = Histogram::with_opts(HistogramOpts::new(
            "ledger_transaction_latency_seconds",
            "Latency of ledger transaction recording.",
        ))?;
        let outbox_lag = IntGauge::new(
            "ledger_outbox_lag_total",
            "Current number of unprocessed events in the outbox.",
        )?;
        let outbox_published = IntCounter::new(
            "ledger_outbox_published_total",
            "Outbox events delivered to the outbound stream.",
        )?;
        let outbox_publish_failures = IntCounter::new(
            "ledger_outbox_publish_failures_total",
            "Failed outbox delivery attempts.",
        )?;
        let payment_messages = IntCounterVec::new(
            Opts::new(
                "ledger_payment_messages_total",
                "Payment stream messages handled by outcome.",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(transactions_recorded.clone()))?;
        registry.register(Box::new(transaction_latency.clone()))?;
        registry.register(Box::new(outbox_lag.clone()))?;
        registry.register(Box::new(outbox_published.clone()))?;
        registry.register(Box::new(outbox_publish_failures.clone()))?;
        registry.register(Box::new(payment_messages.clone()))?;

        Ok(Self {
            registry,
            transactions_recorded,
            transaction_latency,
            outbox_lag,
            outbox_published,
            outbox_publish_failures,
            payment_messages,
        })
    }

    pub fn record_transaction(&self, status: &str) {
        self.transactions_recorded.with_label_values(&[status]).inc();
    }

    pub fn record_payment_message(&self, outcome: &str) {
        self.payment_messages.with_label_values(&[outcome]).inc();
    }

    pub fn transactions_with_status(&self, status: &str) -> u64 {
        self.transactions_recorded.with_label_values(&[status]).get()
    }

    pub fn payment_messages_with_outcome(&self, outcome: &str) -> u64 {
        self.payment_messages.with_label_values(&[outcome]).get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl fmt::Debug for LedgerMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerMetrics").finish_non_exhaustive()
    }
}

//! Consumer module
//!
//! Turns inbound payment events into ledger transactions. The payment id is
//! the reference id, so redelivery is always safe.

mod payment_consumer;

pub use payment_consumer::{MessageOutcome, PaymentConsumerConfig, PaymentEventConsumer};

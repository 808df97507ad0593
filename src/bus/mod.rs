//! Message bus port
//!
//! The ledger only needs two things from the bus:
//!
//! - **Outbound**: append a keyed message to a durable, at-least-once log
//!   (`EventPublisher`).
//! - **Inbound**: consumer-group reads with per-message acknowledgement
//!   (`MessageSource`). Unacknowledged messages are delivered again.
//!
//! Consumers on either side must be idempotent.

mod memory;
mod redis_streams;

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::LedgerError;

pub use memory::InMemoryBus;
pub use redis_streams::{RedisStreamsBus, RedisStreamsConfig};

/// Bus errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus connection error: {0}")]
    Connection(String),

    #[error("Bus command error: {0}")]
    Command(String),

    #[error("Bus unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            BusError::Connection(err.to_string())
        } else {
            BusError::Command(err.to_string())
        }
    }
}

impl From<BusError> for LedgerError {
    fn from(err: BusError) -> Self {
        LedgerError::Publish(err.to_string())
    }
}

/// A message read from the inbound stream, awaiting acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Bus-assigned id used to acknowledge the message
    pub message_id: String,
    pub payload: Vec<u8>,
}

/// Outbound side: durable append
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<(), BusError>;
}

/// Inbound side: consumer-group reads
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Return up to `max` messages, waiting at most `wait` when none are ready.
    ///
    /// Messages delivered earlier but never acknowledged come back first.
    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, BusError>;

    async fn acknowledge(&self, message_id: &str) -> Result<(), BusError>;

    /// Park a message that can never be processed, with the reason
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), BusError>;
}

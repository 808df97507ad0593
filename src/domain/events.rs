//! Events
//!
//! Outbound ledger events written to the outbox, and the inbound payment
//! events the consumer understands. Both travel in the same envelope shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transaction::{Direction, Transaction};
use super::LedgerError;

/// Wire envelope `{id, type, timestamp, payload}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(alias = "data")]
    pub payload: T,
}

// =========================================================================
// Outbound
// =========================================================================

/// Event types the ledger emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEventType {
    TransactionRecorded,
}

impl LedgerEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEventType::TransactionRecorded => "ledger.transaction.recorded",
        }
    }
}

/// Entry as announced downstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEntry {
    pub entry_id: Uuid,
    pub account_id: Uuid,
    pub amount: i64,
    pub direction: Direction,
}

/// Payload of `ledger.transaction.recorded`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecorded {
    pub transaction_id: Uuid,
    pub reference_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<RecordedEntry>,
}

impl From<&Transaction> for TransactionRecorded {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            reference_id: tx.reference_id.clone(),
            description: tx.description.clone(),
            created_at: tx.created_at,
            entries: tx
                .entries
                .iter()
                .map(|e| RecordedEntry {
                    entry_id: e.id,
                    account_id: e.account_id,
                    amount: e.amount,
                    direction: e.direction,
                })
                .collect(),
        }
    }
}

/// Outbox row about to be written inside a unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Vec<u8>,
}

impl NewOutboxEvent {
    /// Build the announcement for a recorded transaction.
    ///
    /// The envelope id equals the outbox row id so downstream consumers can
    /// discard duplicate deliveries.
    pub fn transaction_recorded(tx: &Transaction) -> Result<Self, serde_json::Error> {
        let id = Uuid::new_v4();
        let event_type = LedgerEventType::TransactionRecorded.as_str();
        let envelope = EventEnvelope {
            id: id.to_string(),
            event_type: event_type.to_string(),
            timestamp: Some(tx.created_at),
            payload: TransactionRecorded::from(tx),
        };

        Ok(Self {
            id,
            event_type: event_type.to_string(),
            payload: serde_json::to_vec(&envelope)?,
        })
    }
}

/// Stored outbox row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }
}

// =========================================================================
// Inbound
// =========================================================================

/// Body of a `payment.succeeded` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSucceeded {
    #[serde(alias = "payment_id")]
    pub id: String,
    pub user_id: String,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
}

/// Payment events, dispatched by their `type`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    Succeeded(PaymentSucceeded),
    /// Any other type on the stream; acknowledged without effect
    Other(String),
}

impl PaymentEvent {
    pub const SUCCEEDED: &'static str = "payment.succeeded";

    /// Decode a raw stream message.
    ///
    /// Anything that can never be processed is a `PoisonMessage`.
    pub fn decode(raw: &[u8]) -> Result<Self, LedgerError> {
        let envelope: EventEnvelope<serde_json::Value> = serde_json::from_slice(raw)
            .map_err(|e| LedgerError::PoisonMessage(format!("invalid envelope: {}", e)))?;

        if envelope.event_type != Self::SUCCEEDED {
            return Ok(PaymentEvent::Other(envelope.event_type));
        }

        let payment: PaymentSucceeded = serde_json::from_value(envelope.payload)
            .map_err(|e| LedgerError::PoisonMessage(format!("invalid payment payload: {}", e)))?;

        if payment.id.trim().is_empty() {
            return Err(LedgerError::PoisonMessage("payment id is empty".into()));
        }
        if payment.user_id.trim().is_empty() {
            return Err(LedgerError::PoisonMessage("user id is empty".into()));
        }
        if payment.amount <= 0 {
            return Err(LedgerError::PoisonMessage(format!(
                "payment amount must be positive, got {}",
                payment.amount
            )));
        }

        Ok(PaymentEvent::Succeeded(payment))
    }
}

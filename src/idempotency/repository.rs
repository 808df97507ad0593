//! Idempotency Records
//!
//! Maps an external reference id to the transaction it already produced.
//! The `transactions.reference_id` unique index is the store of record; this
//! module owns the record type and the request fingerprint.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::EntryRequest;

/// Side index entry over transactions, keyed by reference id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub reference_id: String,
    pub transaction_id: Uuid,
    /// SHA-256 fingerprint of the request that created the transaction
    pub request_hash: String,
}

impl IdempotencyRecord {
    pub fn new(reference_id: impl Into<String>, transaction_id: Uuid, request_hash: String) -> Self {
        Self {
            reference_id: reference_id.into(),
            transaction_id,
            request_hash,
        }
    }

    /// True when a retry carries the same payload as the original request
    pub fn matches(&self, request_hash: &str) -> bool {
        self.request_hash == request_hash
    }
}

/// Compute SHA-256 fingerprint of a transaction request for replay checks.
///
/// Entry order is significant: a request with reordered entries is a
/// different request.
pub fn compute_request_hash(reference_id: &str, description: &str, entries: &[EntryRequest]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(reference_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(description.as_bytes());
    hasher.update([0u8]);
    for entry in entries {
        hasher.update(entry.account_id.as_bytes());
        hasher.update(entry.amount.to_be_bytes());
        hasher.update(entry.direction.as_str().as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

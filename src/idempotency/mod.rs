//! Idempotency module
//!
//! Collapses retried requests carrying the same reference id into one effect.

mod repository;

pub use repository::{compute_request_hash, IdempotencyRecord};

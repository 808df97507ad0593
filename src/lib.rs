//! Ledger Core Library
//!
//! Double-entry ledger with idempotent recording, a transactional outbox and
//! an inbound payment consumer. Re-exports modules for integration testing
//! and the binaries.

pub mod api;
pub mod bus;
pub mod consumer;
pub mod domain;
pub mod handlers;
pub mod idempotency;
pub mod metrics;
pub mod outbox;
pub mod projection;
pub mod store;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use domain::{LedgerError, OperationContext};
pub use error::AppError;
pub use metrics::LedgerMetrics;

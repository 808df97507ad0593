//! Projection module
//!
//! Read side of the ledger. Balances are derived from committed entries on
//! every query; there is no stored balance to drift.

mod service;

pub use service::BalanceQueryService;

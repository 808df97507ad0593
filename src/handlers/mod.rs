//! Command Handlers module
//!
//! The write side of the ledger (account registry and transaction processor).
//! Handlers validate commands and drive the storage port inside the caller's
//! operation context.

mod account_handler;
mod commands;
mod transaction_handler;


pub use account_handler::AccountRegistry;
pub use commands::*;
pub use transaction_handler::TransactionProcessor;

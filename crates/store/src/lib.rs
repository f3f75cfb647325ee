//! `tally-store` — durable store boundary for the ledger.
//!
//! This crate defines the abstraction the engine writes through: point
//! reads of accounts and transaction records, an administrative account
//! lifecycle, and `commit` — an all-or-nothing atomic unit spanning the
//! balance writes and record appends of one operation.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{AtomicUnit, BalanceWrite, LedgerStore, NewTransaction, StoreError};

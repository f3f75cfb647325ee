//! `tally-core` — domain foundation for the ledger.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! typed identifiers, the account and transaction-record shapes, and the
//! error taxonomy ledger operations surface to callers.

pub mod account;
pub mod error;
pub mod id;
pub mod transaction;

pub use account::Account;
pub use error::{LedgerError, LedgerResult};
pub use id::{AccountId, OwnerId, TransactionId};
pub use transaction::{TransactionKind, TransactionRecord};

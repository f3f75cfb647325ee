//! Ledger error model.

use thiserror::Error;

use crate::id::AccountId;

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors surfaced by ledger operations.
///
/// Validation failures are detected before any mutation, so a rejected
/// operation leaves every balance exactly as it was. Callers can branch on
/// the variant; none of these require string matching.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The requested amount was not strictly positive.
    #[error("amount must be positive (got {0})")]
    InvalidAmount(i64),

    /// A referenced account does not exist.
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// A debit would take the account below zero.
    #[error("insufficient balance on account {account_id}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        account_id: AccountId,
        balance: i64,
        requested: i64,
    },

    /// Transfer source and destination are the same account.
    #[error("cannot transfer from account {0} to itself")]
    SameAccountTransfer(AccountId),

    /// A credit would overflow the account's minor-unit representation.
    #[error("balance overflow on account {0}")]
    BalanceOverflow(AccountId),

    /// The underlying store was unavailable or aborted mid-operation.
    /// Never retried at this layer; the atomic unit was fully rolled back.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl LedgerError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageFailure(msg.into())
    }
}

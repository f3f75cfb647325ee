use async_trait::async_trait;
use thiserror::Error;

use std::sync::Arc;

use tally_core::{Account, AccountId, OwnerId, TransactionId, TransactionKind, TransactionRecord};

/// A version-checked balance replacement for one account.
///
/// `expected_version` is the revision of the snapshot the new balance was
/// computed from. The store rejects the whole unit with
/// [`StoreError::Conflict`] if the account has moved past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceWrite {
    pub account_id: AccountId,
    pub expected_version: u64,
    pub new_balance: i64,
}

/// A transaction record awaiting its store-assigned id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub account_id: AccountId,
    pub owner_id: OwnerId,
    pub amount: i64,
    pub kind: TransactionKind,
}

/// The write set of one ledger operation: balance writes plus record
/// appends, applied together or not at all.
///
/// A deposit or withdrawal carries one write and one append; a transfer
/// carries two of each. No partial state is ever observable, including
/// across a mid-unit backend failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicUnit {
    writes: Vec<BalanceWrite>,
    appends: Vec<NewTransaction>,
}

impl AtomicUnit {
    /// Build a unit, normalizing write order.
    ///
    /// Writes are sorted by ascending account id so a locking backend
    /// acquires row locks in a fixed global order (no deadlock between two
    /// transfers moving money in opposite directions). Appends keep their
    /// given order; record ids are assigned in it.
    pub fn new(mut writes: Vec<BalanceWrite>, appends: Vec<NewTransaction>) -> Self {
        writes.sort_by_key(|w| w.account_id);
        Self { writes, appends }
    }

    pub fn writes(&self) -> &[BalanceWrite] {
        &self.writes
    }

    pub fn appends(&self) -> &[NewTransaction] {
        &self.appends
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.appends.is_empty()
    }

    /// Structural validation shared by store implementations.
    ///
    /// Rejects units no well-formed engine would produce: a write driving a
    /// balance negative, the same account written twice, a non-positive
    /// append amount, or appends without a matching balance write.
    pub fn validate(&self) -> Result<(), StoreError> {
        for pair in self.writes.windows(2) {
            if pair[0].account_id == pair[1].account_id {
                return Err(StoreError::invalid_unit(format!(
                    "duplicate balance write for account {}",
                    pair[0].account_id
                )));
            }
        }
        for w in &self.writes {
            if w.new_balance < 0 {
                return Err(StoreError::invalid_unit(format!(
                    "negative balance write for account {}",
                    w.account_id
                )));
            }
        }
        for a in &self.appends {
            if a.amount <= 0 {
                return Err(StoreError::invalid_unit(format!(
                    "non-positive record amount for account {}",
                    a.account_id
                )));
            }
            if !self.writes.iter().any(|w| w.account_id == a.account_id) {
                return Err(StoreError::invalid_unit(format!(
                    "record append without balance write for account {}",
                    a.account_id
                )));
            }
        }
        Ok(())
    }
}

/// Store operation error.
///
/// These are **infrastructure** failures; the business taxonomy
/// (`LedgerError`) lives in `tally-core` and is produced by the engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An expected-version check failed: a concurrent writer got there
    /// first. Transient; the caller may re-read and retry.
    #[error("version conflict: {0}")]
    Conflict(String),

    /// Administrative target does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The unit is structurally malformed (engine bug, not contention).
    #[error("invalid atomic unit: {0}")]
    InvalidUnit(String),

    /// The backend is unavailable or failed mid-operation. Any partially
    /// applied unit has been rolled back.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_unit(msg: impl Into<String>) -> Self {
        Self::InvalidUnit(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Durable account store + append-only transaction log.
///
/// Implementations must:
/// - apply `commit` all-or-nothing, with expected-version checks on every
///   balance write
/// - assign strictly increasing transaction ids at append time (no gaps
///   observable within one unit, no reuse ever)
/// - stamp `created_at` at append time
/// - never mutate or delete an appended record
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Administrative: create an account with a non-negative opening
    /// balance. Not an engine operation.
    async fn create_account(
        &self,
        owner_id: OwnerId,
        opening_balance: i64,
    ) -> Result<Account, StoreError>;

    /// Administrative: remove an account. The engine never calls this;
    /// its transaction records stay in the log.
    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    async fn list_transactions(&self) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Apply a unit atomically and return the appended records in append
    /// order, ids and timestamps assigned.
    async fn commit(&self, unit: AtomicUnit) -> Result<Vec<TransactionRecord>, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn create_account(
        &self,
        owner_id: OwnerId,
        opening_balance: i64,
    ) -> Result<Account, StoreError> {
        (**self).create_account(owner_id, opening_balance).await
    }

    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        (**self).delete_account(id).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        (**self).get_account(id).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        (**self).list_accounts().await
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        (**self).get_transaction(id).await
    }

    async fn list_transactions(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        (**self).list_transactions().await
    }

    async fn commit(&self, unit: AtomicUnit) -> Result<Vec<TransactionRecord>, StoreError> {
        (**self).commit(unit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(account_id: AccountId, new_balance: i64) -> BalanceWrite {
        BalanceWrite {
            account_id,
            expected_version: 0,
            new_balance,
        }
    }

    #[test]
    fn unit_sorts_writes_by_account_id() {
        let a = AccountId::new();
        let b = AccountId::new();
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };

        let unit = AtomicUnit::new(vec![write(hi, 1), write(lo, 2)], vec![]);
        assert_eq!(unit.writes()[0].account_id, lo);
        assert_eq!(unit.writes()[1].account_id, hi);
    }

    #[test]
    fn unit_rejects_negative_balance_write() {
        let unit = AtomicUnit::new(vec![write(AccountId::new(), -1)], vec![]);
        assert!(matches!(unit.validate(), Err(StoreError::InvalidUnit(_))));
    }

    #[test]
    fn unit_rejects_duplicate_account_writes() {
        let id = AccountId::new();
        let unit = AtomicUnit::new(vec![write(id, 1), write(id, 2)], vec![]);
        assert!(matches!(unit.validate(), Err(StoreError::InvalidUnit(_))));
    }

    #[test]
    fn unit_rejects_append_without_write() {
        let unit = AtomicUnit::new(
            vec![],
            vec![NewTransaction {
                account_id: AccountId::new(),
                owner_id: OwnerId::new(),
                amount: 10,
                kind: TransactionKind::Deposit,
            }],
        );
        assert!(matches!(unit.validate(), Err(StoreError::InvalidUnit(_))));
    }
}

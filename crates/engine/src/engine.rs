//! Ledger operations: admissibility checks plus the optimistic commit loop.
//!
//! ## Execution Flow
//!
//! Every mutating operation follows the same pipeline:
//!
//! ```text
//! Request
//!   ↓
//! 1. Validate the request shape (amount > 0, distinct accounts)
//!   ↓
//! 2. Read a snapshot of the affected account(s) from the store
//!   ↓
//! 3. Validate against the snapshot (existence, sufficient balance)
//!   ↓
//! 4. Build an atomic unit: version-checked balance writes + record appends
//!   ↓
//! 5. Commit. On version conflict, go back to 2 (bounded retries).
//! ```
//!
//! The snapshot's `version` travels with each balance write, so the store
//! rejects the unit if any touched account moved between the read and the
//! commit. A conflict means contention, not failure: the engine re-reads
//! and revalidates, which is exactly how a losing concurrent withdrawal
//! turns into `InsufficientBalance` instead of an overdraft.
//!
//! ## Error Semantics
//!
//! - Validation failures are detected before any write and surface
//!   directly; they are deterministic and never retried.
//! - `StoreError::Conflict` is retried up to `MAX_COMMIT_ATTEMPTS`;
//!   exhaustion surfaces as `StorageFailure`.
//! - Any other store error surfaces as `StorageFailure` immediately — the
//!   store has already rolled back the unit, and retry policy belongs to
//!   the caller.
//!
//! The engine holds no mutable state besides the injected store handle and
//! never caches balances across calls.

use tracing::instrument;

use tally_core::{
    Account, AccountId, LedgerError, LedgerResult, TransactionId, TransactionKind,
    TransactionRecord,
};
use tally_store::{AtomicUnit, BalanceWrite, LedgerStore, NewTransaction, StoreError};

/// Upper bound on optimistic commit retries for one operation.
///
/// Conflicts only occur while another operation is moving one of the
/// touched accounts, so a handful of re-reads resolves realistic
/// contention. Exhaustion surfaces as `StorageFailure` rather than looping
/// unbounded.
const MAX_COMMIT_ATTEMPTS: u32 = 8;

/// The ledger engine.
///
/// Generic over the store so tests run against `InMemoryLedgerStore` and
/// deployments against `PostgresLedgerStore` (or an `Arc` of either)
/// without touching this code. Caller identity is *not* enforced here;
/// the authorization layer in front of the engine owns that.
#[derive(Debug)]
pub struct LedgerEngine<S> {
    store: S,
}

impl<S> LedgerEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

impl<S> LedgerEngine<S>
where
    S: LedgerStore,
{
    /// Credit `amount` to an account and append a `deposit` record.
    ///
    /// Fails with `InvalidAmount` for non-positive amounts,
    /// `AccountNotFound` if the account is absent, `BalanceOverflow` if
    /// the credit would exceed the minor-unit representation.
    #[instrument(skip(self), fields(%account_id, amount), err)]
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: i64,
    ) -> LedgerResult<TransactionRecord> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let account = self.load_account(account_id).await?;
            let new_balance = account
                .balance
                .checked_add(amount)
                .ok_or(LedgerError::BalanceOverflow(account_id))?;

            let unit = AtomicUnit::new(
                vec![BalanceWrite {
                    account_id,
                    expected_version: account.version,
                    new_balance,
                }],
                vec![NewTransaction {
                    account_id,
                    owner_id: account.owner_id,
                    amount,
                    kind: TransactionKind::Deposit,
                }],
            );

            match self.store.commit(unit).await {
                Ok(records) => return single(records),
                Err(StoreError::Conflict(reason)) => {
                    tracing::debug!(%account_id, attempt, %reason, "deposit conflicted, retrying");
                }
                Err(err) => return Err(storage(err)),
            }
        }

        Err(contended(account_id))
    }

    /// Debit `amount` from an account and append a `withdraw` record.
    ///
    /// Checks, in order: `amount > 0`, account exists, balance covers the
    /// debit. The balance check and the decrement are computed from one
    /// snapshot; the version-checked commit guarantees no other write
    /// slipped in between.
    #[instrument(skip(self), fields(%account_id, amount), err)]
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: i64,
    ) -> LedgerResult<TransactionRecord> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let account = self.load_account(account_id).await?;
            if account.balance < amount {
                return Err(LedgerError::InsufficientBalance {
                    account_id,
                    balance: account.balance,
                    requested: amount,
                });
            }

            let unit = AtomicUnit::new(
                vec![BalanceWrite {
                    account_id,
                    expected_version: account.version,
                    new_balance: account.balance - amount,
                }],
                vec![NewTransaction {
                    account_id,
                    owner_id: account.owner_id,
                    amount,
                    kind: TransactionKind::Withdraw,
                }],
            );

            match self.store.commit(unit).await {
                Ok(records) => return single(records),
                Err(StoreError::Conflict(reason)) => {
                    tracing::debug!(%account_id, attempt, %reason, "withdraw conflicted, retrying");
                }
                Err(err) => return Err(storage(err)),
            }
        }

        Err(contended(account_id))
    }

    /// Move `amount` from one account to another as one atomic unit:
    /// debit, credit, and both legs' records commit together or not at
    /// all. No intermediate state (source debited, destination not yet
    /// credited) is ever externally observable.
    ///
    /// Checks, in order: `amount > 0`, `from != to`, both accounts exist
    /// (source reported first if missing), source balance covers the
    /// debit. Returns the `(transfer_out, transfer_in)` record pair.
    #[instrument(skip(self), fields(%from, %to, amount), err)]
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> LedgerResult<(TransactionRecord, TransactionRecord)> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if from == to {
            return Err(LedgerError::SameAccountTransfer(from));
        }

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let source = self.load_account(from).await?;
            let destination = self.load_account(to).await?;

            if source.balance < amount {
                return Err(LedgerError::InsufficientBalance {
                    account_id: from,
                    balance: source.balance,
                    requested: amount,
                });
            }
            let credited = destination
                .balance
                .checked_add(amount)
                .ok_or(LedgerError::BalanceOverflow(to))?;

            // Owner ids are captured from the same snapshot the checks ran
            // against; a concurrent owner change bumps the version and
            // aborts the unit, so the recorded owner always matches the
            // balances this operation actually saw.
            let unit = AtomicUnit::new(
                vec![
                    BalanceWrite {
                        account_id: from,
                        expected_version: source.version,
                        new_balance: source.balance - amount,
                    },
                    BalanceWrite {
                        account_id: to,
                        expected_version: destination.version,
                        new_balance: credited,
                    },
                ],
                vec![
                    NewTransaction {
                        account_id: from,
                        owner_id: source.owner_id,
                        amount,
                        kind: TransactionKind::TransferOut,
                    },
                    NewTransaction {
                        account_id: to,
                        owner_id: destination.owner_id,
                        amount,
                        kind: TransactionKind::TransferIn,
                    },
                ],
            );

            match self.store.commit(unit).await {
                Ok(records) => return pair(records),
                Err(StoreError::Conflict(reason)) => {
                    tracing::debug!(%from, %to, attempt, %reason, "transfer conflicted, retrying");
                }
                Err(err) => return Err(storage(err)),
            }
        }

        Err(contended(from))
    }

    /// Look up an account. Absence is not an error.
    pub async fn account(&self, id: AccountId) -> LedgerResult<Option<Account>> {
        self.store.get_account(id).await.map_err(storage)
    }

    pub async fn accounts(&self) -> LedgerResult<Vec<Account>> {
        self.store.list_accounts().await.map_err(storage)
    }

    /// Look up a transaction record. Absence is not an error.
    pub async fn transaction(&self, id: TransactionId) -> LedgerResult<Option<TransactionRecord>> {
        self.store.get_transaction(id).await.map_err(storage)
    }

    pub async fn transactions(&self) -> LedgerResult<Vec<TransactionRecord>> {
        self.store.list_transactions().await.map_err(storage)
    }

    async fn load_account(&self, id: AccountId) -> LedgerResult<Account> {
        self.store
            .get_account(id)
            .await
            .map_err(storage)?
            .ok_or(LedgerError::AccountNotFound(id))
    }
}

fn storage(err: StoreError) -> LedgerError {
    LedgerError::storage(err.to_string())
}

fn contended(account_id: AccountId) -> LedgerError {
    LedgerError::storage(format!(
        "contention on account {account_id} not resolved after {MAX_COMMIT_ATTEMPTS} attempts"
    ))
}

fn single(records: Vec<TransactionRecord>) -> LedgerResult<TransactionRecord> {
    let mut records = records.into_iter();
    match (records.next(), records.next()) {
        (Some(record), None) => Ok(record),
        _ => Err(LedgerError::storage(
            "store returned an unexpected record count for a single-leg unit",
        )),
    }
}

fn pair(records: Vec<TransactionRecord>) -> LedgerResult<(TransactionRecord, TransactionRecord)> {
    let mut records = records.into_iter();
    match (records.next(), records.next(), records.next()) {
        (Some(out_leg), Some(in_leg), None) => Ok((out_leg, in_leg)),
        _ => Err(LedgerError::storage(
            "store returned an unexpected record count for a transfer unit",
        )),
    }
}

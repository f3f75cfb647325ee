use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use tally_core::{Account, AccountId, OwnerId, TransactionId, TransactionRecord};

use super::r#trait::{AtomicUnit, LedgerStore, StoreError};

/// In-memory ledger store.
///
/// Intended for tests/dev. Not optimized for performance. A single lock
/// around accounts and log makes every `commit` trivially atomic; the
/// expected-version checks still run so concurrency behavior matches the
/// Postgres backend.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<AccountId, Account>,
    /// Append-only; `log[i].id == i + 1`.
    log: Vec<TransactionRecord>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::backend("lock poisoned")
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_account(
        &self,
        owner_id: OwnerId,
        opening_balance: i64,
    ) -> Result<Account, StoreError> {
        if opening_balance < 0 {
            return Err(StoreError::invalid_unit(format!(
                "negative opening balance {opening_balance}"
            )));
        }
        let account = Account::new(AccountId::new(), owner_id, opening_balance);
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        inner.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        match inner.accounts.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("account {id}"))),
        }
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.accounts.get(&id).cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut accounts: Vec<_> = inner.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let idx = match id.value().checked_sub(1) {
            Some(idx) => idx as usize,
            None => return Ok(None),
        };
        Ok(inner.log.get(idx).cloned())
    }

    async fn list_transactions(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.log.clone())
    }

    async fn commit(&self, unit: AtomicUnit) -> Result<Vec<TransactionRecord>, StoreError> {
        if unit.is_empty() {
            return Ok(vec![]);
        }
        unit.validate()?;

        let mut inner = self.inner.write().map_err(|_| poisoned())?;

        // Validate everything before applying anything: the unit must be
        // all-or-nothing even against a mid-unit failure.
        for w in unit.writes() {
            match inner.accounts.get(&w.account_id) {
                None => {
                    // A concurrently deleted account reads as a version
                    // conflict; the caller re-reads and sees the absence.
                    return Err(StoreError::conflict(format!(
                        "account {} no longer exists",
                        w.account_id
                    )));
                }
                Some(account) if account.version != w.expected_version => {
                    return Err(StoreError::conflict(format!(
                        "account {}: expected version {}, found {}",
                        w.account_id, w.expected_version, account.version
                    )));
                }
                Some(_) => {}
            }
        }

        for w in unit.writes() {
            if let Some(account) = inner.accounts.get_mut(&w.account_id) {
                account.balance = w.new_balance;
                account.version += 1;
            }
        }

        let now = Utc::now();
        let mut committed = Vec::with_capacity(unit.appends().len());
        for a in unit.appends() {
            let record = TransactionRecord {
                id: TransactionId::new(inner.log.len() as u64 + 1),
                account_id: a.account_id,
                owner_id: a.owner_id,
                amount: a.amount,
                kind: a.kind,
                created_at: now,
            };
            inner.log.push(record.clone());
            committed.push(record);
        }

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::r#trait::{BalanceWrite, NewTransaction};
    use tally_core::TransactionKind;

    fn deposit_unit(account: &Account, amount: i64) -> AtomicUnit {
        AtomicUnit::new(
            vec![BalanceWrite {
                account_id: account.id,
                expected_version: account.version,
                new_balance: account.balance + amount,
            }],
            vec![NewTransaction {
                account_id: account.id,
                owner_id: account.owner_id,
                amount,
                kind: TransactionKind::Deposit,
            }],
        )
    }

    #[tokio::test]
    async fn commit_applies_write_and_appends_record() {
        let store = InMemoryLedgerStore::new();
        let account = store.create_account(OwnerId::new(), 0).await.unwrap();

        let committed = store.commit(deposit_unit(&account, 100)).await.unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].id, TransactionId::new(1));
        assert_eq!(committed[0].amount, 100);

        let reread = store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(reread.balance, 100);
        assert_eq!(reread.version, 1);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_and_changes_nothing() {
        let store = InMemoryLedgerStore::new();
        let account = store.create_account(OwnerId::new(), 0).await.unwrap();

        // First commit moves the account to version 1.
        store.commit(deposit_unit(&account, 100)).await.unwrap();

        // Re-submitting against the stale snapshot must conflict.
        let err = store.commit(deposit_unit(&account, 100)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let reread = store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(reread.balance, 100);
        assert_eq!(store.list_transactions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn two_account_unit_fails_whole_when_one_side_is_stale() {
        let store = InMemoryLedgerStore::new();
        let a = store.create_account(OwnerId::new(), 100).await.unwrap();
        let b = store.create_account(OwnerId::new(), 0).await.unwrap();

        // Move `b` forward so the transfer's snapshot of it is stale.
        store.commit(deposit_unit(&b, 5)).await.unwrap();

        let unit = AtomicUnit::new(
            vec![
                BalanceWrite {
                    account_id: a.id,
                    expected_version: a.version,
                    new_balance: 40,
                },
                BalanceWrite {
                    account_id: b.id,
                    expected_version: b.version, // stale
                    new_balance: 60,
                },
            ],
            vec![
                NewTransaction {
                    account_id: a.id,
                    owner_id: a.owner_id,
                    amount: 60,
                    kind: TransactionKind::TransferOut,
                },
                NewTransaction {
                    account_id: b.id,
                    owner_id: b.owner_id,
                    amount: 60,
                    kind: TransactionKind::TransferIn,
                },
            ],
        );

        let err = store.commit(unit).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Neither leg applied.
        assert_eq!(store.get_account(a.id).await.unwrap().unwrap().balance, 100);
        assert_eq!(store.get_account(b.id).await.unwrap().unwrap().balance, 5);
        assert_eq!(store.list_transactions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transaction_ids_are_strictly_increasing() {
        let store = InMemoryLedgerStore::new();
        let mut account = store.create_account(OwnerId::new(), 0).await.unwrap();

        for expected in 1..=3u64 {
            let committed = store.commit(deposit_unit(&account, 10)).await.unwrap();
            assert_eq!(committed[0].id, TransactionId::new(expected));
            account = store.get_account(account.id).await.unwrap().unwrap();
        }

        let by_id = store
            .get_transaction(TransactionId::new(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.id, TransactionId::new(2));
        assert!(store
            .get_transaction(TransactionId::new(99))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_absent_account_is_not_found() {
        let store = InMemoryLedgerStore::new();
        let err = store.delete_account(AccountId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_account_rejects_negative_opening_balance() {
        let store = InMemoryLedgerStore::new();
        let err = store.create_account(OwnerId::new(), -1).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidUnit(_)));
    }
}

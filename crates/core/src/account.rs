//! Account: a balance-bearing row owned by a principal.

use serde::{Deserialize, Serialize};

use crate::id::{AccountId, OwnerId};

/// A ledger account.
///
/// `balance` is in minor units (e.g. cents); it is non-negative at every
/// point observable between operations. `version` is the optimistic
/// concurrency revision: every committed balance write bumps it by one, so
/// a stale snapshot can never overwrite a newer balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner_id: OwnerId,
    pub balance: i64,
    pub version: u64,
}

impl Account {
    /// A fresh account at revision zero.
    pub fn new(id: AccountId, owner_id: OwnerId, balance: i64) -> Self {
        Self {
            id,
            owner_id,
            balance,
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_starts_at_version_zero() {
        let account = Account::new(AccountId::new(), OwnerId::new(), 500);
        assert_eq!(account.version, 0);
        assert_eq!(account.balance, 500);
    }
}

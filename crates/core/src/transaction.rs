//! Immutable entries in the append-only transaction log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AccountId, OwnerId, TransactionId};

/// Direction of a balance movement.
///
/// The log never stores signed amounts; direction is carried here. A
/// transfer appends one `TransferOut` leg on the source account and one
/// `TransferIn` leg on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    TransferOut,
    TransferIn,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
            TransactionKind::TransferOut => "transfer_out",
            TransactionKind::TransferIn => "transfer_in",
        }
    }

    /// Inverse of [`as_str`](Self::as_str), for storage backends that keep
    /// the kind as text.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionKind::Deposit),
            "withdraw" => Some(TransactionKind::Withdraw),
            "transfer_out" => Some(TransactionKind::TransferOut),
            "transfer_in" => Some(TransactionKind::TransferIn),
            _ => None,
        }
    }
}

/// One leg of a committed operation.
///
/// Created exactly once by the engine per leg, in the same atomic unit as
/// the balance write it describes. Immutable thereafter: never updated,
/// never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Store-assigned, strictly increasing.
    pub id: TransactionId,
    pub account_id: AccountId,
    /// Owner of `account_id` as read in the snapshot the operation
    /// validated against (kept for audit independence from later account
    /// mutation).
    pub owner_id: OwnerId,
    /// Positive magnitude in minor units; direction is carried by `kind`.
    pub amount: i64,
    pub kind: TransactionKind,
    /// Assigned by the store at append time.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&TransactionKind::TransferOut).unwrap();
        assert_eq!(json, "\"transfer_out\"");
    }

    #[test]
    fn kind_string_round_trip() {
        for kind in [
            TransactionKind::Deposit,
            TransactionKind::Withdraw,
            TransactionKind::TransferOut,
            TransactionKind::TransferIn,
        ] {
            assert_eq!(TransactionKind::parse_str(kind.as_str()), Some(kind));
        }
        assert_eq!(TransactionKind::parse_str("refund"), None);
    }
}

//! Postgres-backed ledger store.
//!
//! Accounts live in an `accounts` table with a `version` column; the
//! transaction log is an append-only `transactions` table whose `BIGSERIAL`
//! primary key provides the monotonic record ids. `commit` wraps the whole
//! unit in a database transaction: every balance write is an
//! `UPDATE ... WHERE id = $n AND version = $m`, and a zero row count means
//! a concurrent writer got there first — the transaction is rolled back and
//! the unit reports a conflict.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Concurrent insert collision |
//! | Database (check constraint violation) | `23514` | `InvalidUnit` | Negative balance / non-positive amount reached the database |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / network / other | N/A | `Backend` | Backend unavailable |
//!
//! ## Thread Safety
//!
//! `PostgresLedgerStore` is `Send + Sync`; the SQLx pool handles
//! thread-safe connection management.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use std::sync::Arc;
use tracing::instrument;

use tally_core::{
    Account, AccountId, OwnerId, TransactionId, TransactionKind, TransactionRecord,
};

use super::r#trait::{AtomicUnit, LedgerStore, StoreError};

/// Expected schema. `ensure_schema` executes this verbatim; deployments
/// with their own migration tooling can apply it there instead.
///
/// `transactions.account_id` deliberately carries no foreign key: records
/// must survive administrative account deletion.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          UUID PRIMARY KEY,
    owner_id    UUID NOT NULL,
    balance     BIGINT NOT NULL CHECK (balance >= 0),
    version     BIGINT NOT NULL DEFAULT 0,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS transactions (
    id          BIGSERIAL PRIMARY KEY,
    account_id  UUID NOT NULL,
    owner_id    UUID NOT NULL,
    amount      BIGINT NOT NULL CHECK (amount > 0),
    kind        TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

/// Postgres-backed account store + transaction log.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the ledger tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(owner_id = %owner_id), err)]
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
        sqlx::query(
            r#"
            INSERT INTO accounts (id, owner_id, balance, version)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(account.owner_id.as_uuid())
        .bind(account.balance)
        .bind(account.version as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;

        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_account", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("account {id}")));
        }
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(
            "SELECT id, owner_id, balance, version FROM accounts WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_account", e))?;

        match row {
            Some(row) => {
                let account = AccountRow::from_row(&row)
                    .map_err(|e| StoreError::backend(format!("account row decode: {e}")))?;
                Ok(Some(account.into()))
            }
            None => Ok(None),
        }
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, balance, version FROM accounts ORDER BY id ASC",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_accounts", e))?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            let account = AccountRow::from_row(&row)
                .map_err(|e| StoreError::backend(format!("account row decode: {e}")))?;
            accounts.push(account.into());
        }
        Ok(accounts)
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, owner_id, amount, kind, created_at
            FROM transactions
            WHERE id = $1
            "#,
        )
        .bind(id.value() as i64)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_transaction", e))?;

        match row {
            Some(row) => {
                let record = TransactionRow::from_row(&row)
                    .map_err(|e| StoreError::backend(format!("transaction row decode: {e}")))?;
                Ok(Some(record.try_into()?))
            }
            None => Ok(None),
        }
    }

    async fn list_transactions(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, owner_id, amount, kind, created_at
            FROM transactions
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_transactions", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = TransactionRow::from_row(&row)
                .map_err(|e| StoreError::backend(format!("transaction row decode: {e}")))?;
            records.push(record.try_into()?);
        }
        Ok(records)
    }

    /// Apply a unit inside one database transaction.
    ///
    /// Writes arrive sorted by account id (see `AtomicUnit::new`), so row
    /// locks are taken in a fixed global order. Any failure rolls the whole
    /// unit back; nothing partial ever commits.
    #[instrument(
        skip(self, unit),
        fields(writes = unit.writes().len(), appends = unit.appends().len()),
        err
    )]
    async fn commit(&self, unit: AtomicUnit) -> Result<Vec<TransactionRecord>, StoreError> {
        if unit.is_empty() {
            return Ok(vec![]);
        }
        unit.validate()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for w in unit.writes() {
            let result = sqlx::query(
                r#"
                UPDATE accounts
                SET balance = $1, version = version + 1
                WHERE id = $2 AND version = $3
                "#,
            )
            .bind(w.new_balance)
            .bind(w.account_id.as_uuid())
            .bind(w.expected_version as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("write_balance", e))?;

            if result.rows_affected() == 0 {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(StoreError::conflict(format!(
                    "account {}: version {} is stale or account is gone",
                    w.account_id, w.expected_version
                )));
            }
        }

        let mut committed = Vec::with_capacity(unit.appends().len());
        for a in unit.appends() {
            let row = sqlx::query(
                r#"
                INSERT INTO transactions (account_id, owner_id, amount, kind)
                VALUES ($1, $2, $3, $4)
                RETURNING id, created_at
                "#,
            )
            .bind(a.account_id.as_uuid())
            .bind(a.owner_id.as_uuid())
            .bind(a.amount)
            .bind(a.kind.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("append_transaction", e))?;

            let id: i64 = row
                .try_get("id")
                .map_err(|e| StoreError::backend(format!("failed to read record id: {e}")))?;
            let created_at: DateTime<Utc> = row
                .try_get("created_at")
                .map_err(|e| StoreError::backend(format!("failed to read created_at: {e}")))?;

            committed.push(TransactionRecord {
                id: TransactionId::new(id as u64),
                account_id: a.account_id,
                owner_id: a.owner_id,
                amount: a.amount,
                kind: a.kind,
                created_at,
            });
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(committed)
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation: concurrent insert collision.
                Some("23505") => StoreError::conflict(msg),
                // Check constraint violation: a malformed write slipped
                // past validation and was stopped by the schema.
                Some("23514") => StoreError::invalid_unit(msg),
                _ => StoreError::backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::backend(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct AccountRow {
    id: uuid::Uuid,
    owner_id: uuid::Uuid,
    balance: i64,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AccountRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            balance: row.try_get("balance")?,
            version: row.try_get("version")?,
        })
    }
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: AccountId::from_uuid(row.id),
            owner_id: OwnerId::from_uuid(row.owner_id),
            balance: row.balance,
            version: row.version as u64,
        }
    }
}

#[derive(Debug)]
struct TransactionRow {
    id: i64,
    account_id: uuid::Uuid,
    owner_id: uuid::Uuid,
    amount: i64,
    kind: String,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for TransactionRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            owner_id: row.try_get("owner_id")?,
            amount: row.try_get("amount")?,
            kind: row.try_get("kind")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind = TransactionKind::parse_str(&row.kind)
            .ok_or_else(|| StoreError::backend(format!("unknown transaction kind '{}'", row.kind)))?;
        Ok(TransactionRecord {
            id: TransactionId::new(row.id as u64),
            account_id: AccountId::from_uuid(row.account_id),
            owner_id: OwnerId::from_uuid(row.owner_id),
            amount: row.amount,
            kind,
            created_at: row.created_at,
        })
    }
}

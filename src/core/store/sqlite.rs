//! SQLite ledger store
//!
//! Every write runs in a `BEGIN IMMEDIATE` database transaction, which takes
//! SQLite's single writer lock up front. The lock wait is bounded by the
//! connection's busy timeout; a busy database surfaces as `LockTimeout`.
//! Reads run in deferred transactions and see a WAL snapshot, so they never
//! block writers and never observe a half-committed unit.
//!
//! Money is stored as INTEGER minor units and timestamps as INTEGER
//! microseconds since the Unix epoch. The clearing account is row 0 of
//! `accounts` and is the only row allowed a negative balance.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};

use super::{audit_ledger, deposit_entries, entry_effects, lock_order, seed_description};
use crate::core::account_number::AccountNumberGenerator;
use crate::core::clock::Clock;
use crate::core::history::HistoryOrder;
use crate::core::traits::{AuditReport, LedgerStore, LedgerUnit};
use crate::types::{
    validate_entries, Account, AccountId, CustomerId, Entry, EntryType, LedgerError, Money,
    NewEntry, Transaction, TransactionType, CLEARING_ACCOUNT,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id             INTEGER PRIMARY KEY,
    account_number TEXT    NOT NULL UNIQUE,
    customer_id    INTEGER NOT NULL,
    balance        INTEGER NOT NULL,
    created_at     INTEGER NOT NULL,
    CHECK (id = 0 OR balance >= 0)
);

CREATE TABLE IF NOT EXISTS transactions (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_type TEXT    NOT NULL CHECK (transaction_type IN ('DEPOSIT', 'TRANSFER', 'WITHDRAWAL')),
    description      TEXT,
    timestamp        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_id INTEGER NOT NULL REFERENCES transactions(id),
    account_id     INTEGER NOT NULL REFERENCES accounts(id),
    entry_type     TEXT    NOT NULL CHECK (entry_type IN ('DEBIT', 'CREDIT')),
    amount         INTEGER NOT NULL CHECK (amount > 0)
);

CREATE INDEX IF NOT EXISTS entries_by_account ON entries(account_id, transaction_id);
CREATE INDEX IF NOT EXISTS entries_by_transaction ON entries(transaction_id);
CREATE INDEX IF NOT EXISTS transactions_by_time ON transactions(timestamp, id);

CREATE TABLE IF NOT EXISTS daily_account_sequences (
    date     TEXT    PRIMARY KEY,
    sequence INTEGER NOT NULL
);

INSERT OR IGNORE INTO accounts (id, account_number, customer_id, balance, created_at)
VALUES (0, 'CLEARING', 0, 0, 0);
";

/// Ledger store persisted in an SQLite database file
///
/// Every write unit runs under `BEGIN IMMEDIATE`, which takes the database-wide
/// writer lock. Units over unrelated accounts therefore queue behind each other
/// rather than running in parallel; a wait longer than the lock timeout
/// surfaces as `LockTimeout` and is retried by the engine. Reads use deferred
/// transactions over WAL snapshots and never wait for writers.
pub struct SqliteLedgerStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl std::fmt::Debug for SqliteLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedgerStore")
            .field("path", &self.path)
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

fn sql_id(id: u64) -> Result<i64, LedgerError> {
    i64::try_from(id).map_err(|_| LedgerError::account_not_found(id))
}

fn sql_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn timestamp_from_sql(column: usize, micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, micros))
}

fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn read_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get::<_, i64>(0)? as AccountId,
        number: row.get(1)?,
        customer_id: row.get::<_, i64>(2)? as CustomerId,
        balance: Money::from_minor(row.get(3)?),
        created_at: timestamp_from_sql(4, row.get(4)?)?,
    })
}

fn read_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let entry_type: String = row.get(3)?;
    Ok(Entry {
        id: row.get::<_, i64>(0)? as u64,
        transaction_id: row.get::<_, i64>(1)? as u64,
        account_id: row.get::<_, i64>(2)? as AccountId,
        entry_type: EntryType::parse(&entry_type).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(3, "entry_type".to_string(), rusqlite::types::Type::Text)
        })?,
        amount: Money::from_minor(row.get(4)?),
    })
}

fn read_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let transaction_type: String = row.get(1)?;
    Ok(Transaction {
        id: row.get::<_, i64>(0)? as u64,
        transaction_type: TransactionType::parse(&transaction_type).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(
                1,
                "transaction_type".to_string(),
                rusqlite::types::Type::Text,
            )
        })?,
        description: row.get(2)?,
        timestamp: timestamp_from_sql(3, row.get(3)?)?,
        entries: Vec::new(),
    })
}

fn load_account(conn: &Connection, account_id: AccountId) -> Result<Account, LedgerError> {
    if account_id == CLEARING_ACCOUNT {
        return Err(LedgerError::account_not_found(account_id));
    }

    conn.query_row(
        "SELECT id, account_number, customer_id, balance, created_at FROM accounts WHERE id = ?1",
        [sql_id(account_id)?],
        read_account,
    )
    .optional()?
    .ok_or(LedgerError::account_not_found(account_id))
}

fn load_entries(conn: &Connection, transaction: &mut Transaction) -> Result<(), LedgerError> {
    let mut statement = conn.prepare_cached(
        "SELECT id, transaction_id, account_id, entry_type, amount
         FROM entries WHERE transaction_id = ?1 ORDER BY id",
    )?;
    transaction.entries = statement
        .query_map([sql_id(transaction.id)?], read_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(())
}

fn clearing_balance(conn: &Connection) -> Result<Money, LedgerError> {
    let balance: i64 = conn.query_row(
        "SELECT balance FROM accounts WHERE id = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(Money::from_minor(balance))
}

/// Insert a transaction and its entries; balances are the caller's concern
fn insert_transaction(
    conn: &Connection,
    timestamp: DateTime<Utc>,
    transaction_type: TransactionType,
    description: Option<String>,
    entries: Vec<NewEntry>,
) -> Result<Transaction, LedgerError> {
    conn.execute(
        "INSERT INTO transactions (transaction_type, description, timestamp) VALUES (?1, ?2, ?3)",
        params![
            transaction_type.as_str(),
            description,
            timestamp.timestamp_micros()
        ],
    )?;
    let id = conn.last_insert_rowid() as u64;

    let mut statement = conn.prepare_cached(
        "INSERT INTO entries (transaction_id, account_id, entry_type, amount) VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut stored = Vec::with_capacity(entries.len());
    for entry in entries {
        statement.execute(params![
            sql_id(id)?,
            sql_id(entry.account_id)?,
            entry.entry_type.as_str(),
            entry.amount.minor_units()
        ])?;
        stored.push(Entry {
            id: conn.last_insert_rowid() as u64,
            transaction_id: id,
            account_id: entry.account_id,
            entry_type: entry.entry_type,
            amount: entry.amount,
        });
    }

    Ok(Transaction {
        id,
        transaction_type,
        description,
        timestamp,
        entries: stored,
    })
}

/// Sum of an account's committed entries
fn replay_entries(conn: &Connection, account_id: AccountId) -> Result<Money, LedgerError> {
    let mut statement =
        conn.prepare("SELECT entry_type, amount FROM entries WHERE account_id = ?1 ORDER BY id")?;
    let mut rows = statement.query([sql_id(account_id)?])?;

    let mut balance = Money::ZERO;
    while let Some(row) = rows.next()? {
        let entry_type: String = row.get(0)?;
        let entry_type = EntryType::parse(&entry_type)
            .ok_or_else(|| LedgerError::integrity(format!("unknown entry type '{entry_type}'")))?;
        balance = balance.checked_add(entry_type.signed(Money::from_minor(row.get(1)?))?)?;
    }
    Ok(balance)
}

fn add_to_clearing(conn: &Connection, delta: Money) -> Result<(), LedgerError> {
    if delta == Money::ZERO {
        return Ok(());
    }
    let balance = clearing_balance(conn)?.checked_add(delta)?;
    conn.execute(
        "UPDATE accounts SET balance = ?1 WHERE id = 0",
        [balance.minor_units()],
    )?;
    Ok(())
}

impl SqliteLedgerStore {
    /// Open (and if needed create) a ledger database
    ///
    /// # Arguments
    ///
    /// * `path` - Database file; created with the schema if missing
    /// * `clock` - Timestamps committed transactions
    /// * `lock_timeout` - Busy timeout for the database writer lock
    ///
    /// # Errors
    ///
    /// `Storage` if the file cannot be opened or the schema cannot be applied.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>, lock_timeout: Duration) -> Result<Self, LedgerError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            clock,
            lock_timeout,
        };

        let conn = store.connect()?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!(path = %store.path.display(), journal_mode = %mode, "opened ledger database");
        conn.execute_batch(SCHEMA)?;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every customer account, ordered by id
    pub fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        let conn = self.connect()?;
        let mut statement = conn.prepare(
            "SELECT id, account_number, customer_id, balance, created_at
             FROM accounts WHERE id != 0 ORDER BY id",
        )?;
        let accounts = statement
            .query_map([], read_account)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    fn connect(&self) -> Result<Connection, LedgerError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.lock_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    fn busy_or_storage(&self, error: rusqlite::Error, account_id: AccountId) -> LedgerError {
        if is_busy(&error) {
            tracing::debug!(account = account_id, "database writer lock wait timed out");
            LedgerError::lock_timeout(account_id, self.lock_timeout)
        } else {
            LedgerError::from(error)
        }
    }

    /// Insert an account row and its seed deposit inside an open write transaction
    fn insert_account(
        &self,
        conn: &Connection,
        number: &str,
        customer_id: CustomerId,
        initial_deposit: Money,
    ) -> Result<Account, LedgerError> {
        let created_at = self.clock.now();
        let inserted = conn.execute(
            "INSERT INTO accounts (account_number, customer_id, balance, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                number,
                sql_id(customer_id)?,
                initial_deposit.minor_units(),
                created_at.timestamp_micros()
            ],
        );
        match inserted {
            Err(error) if is_unique_violation(&error) => {
                return Err(LedgerError::duplicate_account_number(number));
            }
            other => {
                other?;
            }
        }

        let id = conn.last_insert_rowid() as AccountId;
        if initial_deposit.is_positive() {
            insert_transaction(
                conn,
                created_at,
                TransactionType::Deposit,
                Some(seed_description(initial_deposit)),
                deposit_entries(id, initial_deposit),
            )?;
            add_to_clearing(conn, initial_deposit.checked_neg()?)?;
        }

        load_account(conn, id)
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn create_account(
        &self,
        customer_id: CustomerId,
        initial_deposit: Money,
        numbers: &AccountNumberGenerator,
    ) -> Result<Account, LedgerError> {
        if initial_deposit.is_negative() {
            return Err(LedgerError::invalid_amount(initial_deposit));
        }

        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|error| self.busy_or_storage(error, CLEARING_ACCOUNT))?;

        let date = numbers.today();
        let sequence: i64 = tx.query_row(
            "INSERT INTO daily_account_sequences (date, sequence) VALUES (?1, 1)
             ON CONFLICT(date) DO UPDATE SET sequence = sequence + 1
             RETURNING sequence",
            [date.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )?;
        let sequence = u32::try_from(sequence).unwrap_or(u32::MAX);

        let account = numbers.allocate(date, sequence, |candidate| {
            self.insert_account(&tx, candidate, customer_id, initial_deposit)
        })?;

        tx.commit()?;
        tracing::debug!(account = account.id, number = %account.number, "account created");
        Ok(account)
    }

    fn get_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        load_account(&self.connect()?, account_id)
    }

    fn with_exclusive_accounts<T, F>(&self, account_ids: &[AccountId], f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut dyn LedgerUnit) -> Result<T, LedgerError>,
    {
        let ordered = lock_order(account_ids);
        let first = ordered.first().copied().unwrap_or(CLEARING_ACCOUNT);

        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|error| self.busy_or_storage(error, first))?;

        let mut accounts = HashMap::with_capacity(ordered.len());
        for account_id in &ordered {
            accounts.insert(*account_id, load_account(&tx, *account_id)?);
        }

        let mut unit = SqliteUnit {
            conn: &tx,
            clock: self.clock.as_ref(),
            accounts,
        };
        let value = f(&mut unit)?;

        tx.commit()?;
        Ok(value)
    }

    fn committed_balance(&self, account_id: AccountId) -> Result<Money, LedgerError> {
        Ok(self.get_account(account_id)?.balance)
    }

    fn replay_balance(&self, account_id: AccountId) -> Result<Money, LedgerError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        load_account(&tx, account_id)?;
        replay_entries(&tx, account_id)
    }

    fn balance_snapshot(&self, account_id: AccountId) -> Result<(Money, Money), LedgerError> {
        // Both reads share the snapshot taken by the first one
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let cached = load_account(&tx, account_id)?.balance;
        Ok((cached, replay_entries(&tx, account_id)?))
    }

    fn history(
        &self,
        account_id: AccountId,
        order: HistoryOrder,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        load_account(&tx, account_id)?;

        let sql = match order {
            HistoryOrder::NewestFirst => {
                "SELECT id, transaction_type, description, timestamp FROM transactions
                 WHERE id IN (SELECT transaction_id FROM entries WHERE account_id = ?1)
                 ORDER BY timestamp DESC, id DESC LIMIT ?2 OFFSET ?3"
            }
            HistoryOrder::OldestFirst => {
                "SELECT id, transaction_type, description, timestamp FROM transactions
                 WHERE id IN (SELECT transaction_id FROM entries WHERE account_id = ?1)
                 ORDER BY timestamp ASC, id ASC LIMIT ?2 OFFSET ?3"
            }
        };

        let mut transactions = {
            let mut statement = tx.prepare(sql)?;
            let rows = statement.query_map(
                params![sql_id(account_id)?, sql_count(limit), sql_count(offset)],
                read_transaction,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        for transaction in &mut transactions {
            load_entries(&tx, transaction)?;
        }
        Ok(transactions)
    }

    fn audit(&self) -> Result<AuditReport, LedgerError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let accounts = {
            let mut statement = tx.prepare(
                "SELECT id, account_number, customer_id, balance, created_at
                 FROM accounts WHERE id != 0 ORDER BY id",
            )?;
            let rows = statement.query_map([], read_account)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut transactions: BTreeMap<u64, Transaction> = {
            let mut statement =
                tx.prepare("SELECT id, transaction_type, description, timestamp FROM transactions")?;
            let rows = statement.query_map([], read_transaction)?;
            rows.map(|row| row.map(|transaction| (transaction.id, transaction)))
                .collect::<rusqlite::Result<_>>()?
        };

        {
            let mut statement = tx.prepare(
                "SELECT id, transaction_id, account_id, entry_type, amount FROM entries ORDER BY id",
            )?;
            let rows = statement.query_map([], read_entry)?;
            for entry in rows {
                let entry = entry?;
                match transactions.get_mut(&entry.transaction_id) {
                    Some(transaction) => transaction.entries.push(entry),
                    None => {
                        return Err(LedgerError::integrity(format!(
                            "entry {} references missing transaction {}",
                            entry.id, entry.transaction_id
                        )))
                    }
                }
            }
        }

        audit_ledger(&accounts, clearing_balance(&tx)?, transactions.values())
    }
}

/// Unit of work inside an open `BEGIN IMMEDIATE` transaction
struct SqliteUnit<'a> {
    conn: &'a Connection,
    clock: &'a dyn Clock,
    accounts: HashMap<AccountId, Account>,
}

impl SqliteUnit<'_> {
    fn apply(
        &mut self,
        transaction_type: TransactionType,
        description: Option<String>,
        entries: Vec<NewEntry>,
    ) -> Result<Transaction, LedgerError> {
        let effects = entry_effects(&self.accounts, &entries)?;
        let transaction = insert_transaction(
            self.conn,
            self.clock.now(),
            transaction_type,
            description,
            entries,
        )?;

        for (account_id, balance) in &effects.balances {
            self.conn.execute(
                "UPDATE accounts SET balance = ?1 WHERE id = ?2",
                params![balance.minor_units(), sql_id(*account_id)?],
            )?;
        }
        add_to_clearing(self.conn, effects.clearing_delta)?;

        for (account_id, balance) in effects.balances {
            if let Some(account) = self.accounts.get_mut(&account_id) {
                account.balance = balance;
            }
        }
        Ok(transaction)
    }
}

impl LedgerUnit for SqliteUnit<'_> {
    fn account(&self, account_id: AccountId) -> Result<&Account, LedgerError> {
        self.accounts
            .get(&account_id)
            .ok_or(LedgerError::AccountNotLocked {
                account: account_id,
            })
    }

    fn append_transaction(
        &mut self,
        transaction_type: TransactionType,
        description: Option<String>,
        entries: Vec<NewEntry>,
    ) -> Result<Transaction, LedgerError> {
        validate_entries(&entries)?;

        // A failed append must not leave rows behind if the caller carries on
        self.conn.execute_batch("SAVEPOINT append_transaction")?;
        match self.apply(transaction_type, description, entries) {
            Ok(transaction) => {
                self.conn.execute_batch("RELEASE append_transaction")?;
                Ok(transaction)
            }
            Err(error) => {
                self.conn
                    .execute_batch("ROLLBACK TO append_transaction; RELEASE append_transaction")?;
                Err(error)
            }
        }
    }
}

//! Core traits for ledger storage and external collaborators
//!
//! This module defines the seams of the ledger core: the transactional store
//! every component goes through, the unit of work handed out while accounts
//! are exclusively locked, and the customer lookup the core consumes.

use crate::core::account_number::AccountNumberGenerator;
use crate::core::history::HistoryOrder;
use crate::types::{
    validate_entries, Account, AccountId, CustomerId, LedgerError, Money, NewEntry, Transaction,
    TransactionType,
};

/// Customer lookup consumed by account creation
pub trait CustomerDirectory: Send + Sync {
    /// Whether a customer with this id exists
    fn customer_exists(&self, customer_id: CustomerId) -> bool;
}

/// Work performed while a set of accounts is exclusively locked
///
/// Reads return the locked, freshly-read account state, including the effect
/// of entries appended earlier in the same unit. Writes are staged and become
/// visible to other callers only when the unit commits.
pub trait LedgerUnit {
    /// Locked account state
    ///
    /// # Errors
    ///
    /// `AccountNotLocked` if the account is not part of this unit.
    fn account(&self, account_id: AccountId) -> Result<&Account, LedgerError>;

    /// Stage one balanced transaction and apply its entries to the locked accounts
    ///
    /// # Errors
    ///
    /// - `EntryAmountNotPositive` / `UnbalancedTransaction` from entry validation
    /// - `AccountNotLocked` if an entry references an account outside the unit
    /// - `InsufficientFunds` if a customer balance would go negative
    /// - `AmountOverflow` if a balance overflows
    fn append_transaction(
        &mut self,
        transaction_type: TransactionType,
        description: Option<String>,
        entries: Vec<NewEntry>,
    ) -> Result<Transaction, LedgerError>;
}

/// Summary of a successful replay of the entry log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    /// Customer accounts checked
    pub accounts: usize,
    /// Committed transactions checked
    pub transactions: usize,
    /// Committed entries checked
    pub entries: usize,
    /// Sum of all customer account balances
    pub customer_total: Money,
    /// Balance of the clearing account (`-customer_total`)
    pub clearing_balance: Money,
}

/// Durable, transactional storage of accounts, transactions and entries
///
/// Implementations guarantee that every mutation is one atomic unit: either
/// all of its rows and balance updates are committed, or none are.
pub trait LedgerStore: Send + Sync {
    /// Insert a customer account with a unique account number
    ///
    /// The per-date sequence is incremented inside the same atomic unit that
    /// inserts the row. When `initial_deposit` is positive a seed DEPOSIT
    /// transaction (clearing DEBIT, account CREDIT) is written in that unit too.
    /// Customer existence is checked by the caller.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if the deposit is negative
    /// - `AccountNumberGenerationExhausted` if no unique number was found
    fn create_account(
        &self,
        customer_id: CustomerId,
        initial_deposit: Money,
        numbers: &AccountNumberGenerator,
    ) -> Result<Account, LedgerError>;

    /// Committed account state
    ///
    /// # Errors
    ///
    /// `AccountNotFound` for unknown ids and for the clearing account.
    fn get_account(&self, account_id: AccountId) -> Result<Account, LedgerError>;

    /// Run `f` with exclusive locks on the given accounts
    ///
    /// Locks are acquired in ascending account id order (duplicates and the
    /// clearing account are ignored), so two units over the same accounts can
    /// never deadlock. `f`'s writes are committed atomically when it returns
    /// `Ok`; any error discards them entirely.
    ///
    /// # Errors
    ///
    /// - `LockTimeout` if a lock is not acquired within the lock-wait timeout
    /// - `AccountNotFound` if an account does not exist once locked
    /// - whatever `f` returns
    fn with_exclusive_accounts<T, F>(&self, account_ids: &[AccountId], f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut dyn LedgerUnit) -> Result<T, LedgerError>;

    /// Append one balanced transaction as its own atomic unit
    ///
    /// # Errors
    ///
    /// See [`LedgerUnit::append_transaction`] and [`LedgerStore::with_exclusive_accounts`].
    fn append_transaction(
        &self,
        transaction_type: TransactionType,
        description: Option<String>,
        entries: Vec<NewEntry>,
    ) -> Result<Transaction, LedgerError> {
        validate_entries(&entries)?;
        let account_ids: Vec<AccountId> = entries.iter().map(|entry| entry.account_id).collect();
        self.with_exclusive_accounts(&account_ids, |unit| {
            unit.append_transaction(transaction_type, description, entries)
        })
    }

    /// Committed balance, read from a consistent snapshot
    fn committed_balance(&self, account_id: AccountId) -> Result<Money, LedgerError>;

    /// Balance recomputed from the account's committed entries
    fn replay_balance(&self, account_id: AccountId) -> Result<Money, LedgerError>;

    /// Cached balance and its replay, both read from the same committed snapshot
    ///
    /// # Errors
    ///
    /// `AccountNotFound` for unknown ids.
    fn balance_snapshot(&self, account_id: AccountId) -> Result<(Money, Money), LedgerError>;

    /// One page of the committed transactions touching an account
    ///
    /// Ordered by timestamp, ties broken by transaction id, in the given direction.
    ///
    /// # Errors
    ///
    /// `AccountNotFound` for unknown ids.
    fn history(
        &self,
        account_id: AccountId,
        order: HistoryOrder,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Transaction>, LedgerError>;

    /// Replay the whole entry log and check it against committed state
    ///
    /// # Errors
    ///
    /// `IntegrityViolation` describing the first mismatch found.
    fn audit(&self) -> Result<AuditReport, LedgerError>;
}

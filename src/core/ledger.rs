//! Ledger facade
//!
//! `Ledger` is the surface the collaborator layer calls: it wires the store to
//! its collaborators (customer directory, clock, random source) and exposes
//! account creation, balance and history reads, transfers and the audit as
//! plain-data operations.

use std::sync::Arc;

use crate::config::LedgerConfig;
use crate::core::account_number::AccountNumberGenerator;
use crate::core::balance::BalanceAccessor;
use crate::core::clock::Clock;
use crate::core::engine::{with_lock_retries, TransferEngine};
use crate::core::history::{HistoryPage, HistoryQuery, HistoryReader};
use crate::core::random::RandomSource;
use crate::core::traits::{AuditReport, CustomerDirectory, LedgerStore};
use crate::types::{Account, AccountId, CustomerId, LedgerError, Money, Transaction};

/// Double-entry ledger over a store backend
pub struct Ledger<S> {
    store: S,
    directory: Arc<dyn CustomerDirectory>,
    numbers: AccountNumberGenerator,
    config: LedgerConfig,
}

impl<S: std::fmt::Debug> std::fmt::Debug for Ledger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("store", &self.store)
            .field("numbers", &self.numbers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: LedgerStore> Ledger<S> {
    /// Create a ledger
    ///
    /// # Arguments
    ///
    /// * `store` - Backend holding accounts, transactions and entries
    /// * `directory` - Customer lookup used by account creation
    /// * `clock` - Supplies the date embedded in account numbers
    /// * `random` - Supplies account-number suffixes
    /// * `config` - Retry and paging settings
    pub fn new(
        store: S,
        directory: Arc<dyn CustomerDirectory>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        config: LedgerConfig,
    ) -> Self {
        let numbers = AccountNumberGenerator::new(clock, random, config.account_number_attempts);
        Self {
            store,
            directory,
            numbers,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn engine(&self) -> TransferEngine<'_, S> {
        TransferEngine::new(&self.store, &self.config)
    }

    /// Open an account for an existing customer
    ///
    /// A positive `initial_deposit` is recorded as a seed DEPOSIT transaction
    /// in the same atomic unit that inserts the account.
    ///
    /// # Errors
    ///
    /// - `CustomerNotFound` if the directory does not know the customer
    /// - `InvalidAmount` if the deposit is negative
    /// - `AccountNumberGenerationExhausted` if no unique number was found
    /// - `LockTimeout` once every retry timed out
    pub fn create_account(&self, customer_id: CustomerId, initial_deposit: Money) -> Result<Account, LedgerError> {
        if !self.directory.customer_exists(customer_id) {
            return Err(LedgerError::customer_not_found(customer_id));
        }
        if initial_deposit.is_negative() {
            return Err(LedgerError::invalid_amount(initial_deposit));
        }

        with_lock_retries(
            self.config.lock_retries,
            self.config.retry_backoff,
            "create_account",
            |_| {
                self.store
                    .create_account(customer_id, initial_deposit, &self.numbers)
            },
        )
    }

    /// # Errors
    ///
    /// `AccountNotFound` for unknown accounts.
    pub fn get_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.store.get_account(account_id)
    }

    /// Committed balance of an account
    pub fn get_balance(&self, account_id: AccountId) -> Result<Money, LedgerError> {
        BalanceAccessor::new(&self.store).get_balance(account_id)
    }

    /// Committed balance, checked against a replay of the account's entries
    pub fn verify_balance(&self, account_id: AccountId) -> Result<Money, LedgerError> {
        BalanceAccessor::new(&self.store).verify(account_id)
    }

    /// See [`TransferEngine::transfer`]
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Money,
        description: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        self.engine().transfer(from, to, amount, description)
    }

    /// See [`TransferEngine::deposit`]
    pub fn deposit(&self, account_id: AccountId, amount: Money, description: Option<String>) -> Result<Transaction, LedgerError> {
        self.engine().deposit(account_id, amount, description)
    }

    /// See [`TransferEngine::withdraw`]
    pub fn withdraw(&self, account_id: AccountId, amount: Money, description: Option<String>) -> Result<Transaction, LedgerError> {
        self.engine().withdraw(account_id, amount, description)
    }

    /// One page of an account's committed history
    ///
    /// # Errors
    ///
    /// `AccountNotFound` for unknown accounts.
    pub fn get_history(&self, account_id: AccountId, query: HistoryQuery) -> Result<HistoryPage, LedgerError> {
        HistoryReader::new(&self.store, &self.config).read(account_id, query)
    }

    /// Replay the entry log and check every ledger invariant
    pub fn audit(&self) -> Result<AuditReport, LedgerError> {
        let report = self.store.audit()?;
        tracing::debug!(
            accounts = report.accounts,
            transactions = report.transactions,
            entries = report.entries,
            "audit passed"
        );
        Ok(report)
    }
}

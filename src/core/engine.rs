//! Transfer engine
//!
//! This module provides the `TransferEngine`, which moves money between
//! accounts (and into or out of the ledger) by writing balanced transactions
//! through the store's ordered-lock primitive.
//!
//! # State machine
//!
//! Every operation walks `Validating → Locking → Applying → Committed`.
//! Input errors end in `Rejected` before any lock is taken. Failures after
//! that point end in `Aborted`, and the store's atomic unit guarantees
//! nothing was written. A `LockTimeout` aborts the attempt and is retried a
//! bounded number of times with linear backoff.

use std::time::Duration;

use crate::config::LedgerConfig;
use crate::core::store::deposit_entries;
use crate::core::traits::{LedgerStore, LedgerUnit};
use crate::types::{
    AccountId, LedgerError, Money, NewEntry, Transaction, TransactionType, CLEARING_ACCOUNT,
};

/// Description used when a transfer is requested without one
pub const DEFAULT_TRANSFER_DESCRIPTION: &str = "Transfer between accounts";

/// Lifecycle of one engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Validating,
    Locking,
    Applying,
    Committed,
    Rejected,
    Aborted,
}

/// Run `f`, retrying while it fails with `LockTimeout`
///
/// # Arguments
///
/// * `retries` - Extra attempts after the first one
/// * `backoff` - Pause before retry `n` is `backoff * n`
/// * `operation` - Name used in log events
pub(crate) fn with_lock_retries<T, F>(
    retries: u32,
    backoff: Duration,
    operation: &'static str,
    mut f: F,
) -> Result<T, LedgerError>
where
    F: FnMut(u32) -> Result<T, LedgerError>,
{
    let mut attempt = 1;
    loop {
        match f(attempt) {
            Err(LedgerError::LockTimeout { account, waited_ms }) => {
                if attempt > retries {
                    tracing::warn!(operation, account, attempts = attempt, "giving up after lock timeouts");
                    return Err(LedgerError::LockTimeout { account, waited_ms });
                }
                tracing::debug!(operation, account, attempt, "lock timeout, retrying");
                std::thread::sleep(backoff.saturating_mul(attempt));
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Moves money through balanced transactions
///
/// The engine borrows the store; it keeps no state of its own between calls.
#[derive(Debug)]
pub struct TransferEngine<'a, S> {
    store: &'a S,
    lock_retries: u32,
    retry_backoff: Duration,
}

impl<'a, S: LedgerStore> TransferEngine<'a, S> {
    pub fn new(store: &'a S, config: &LedgerConfig) -> Self {
        Self {
            store,
            lock_retries: config.lock_retries,
            retry_backoff: config.retry_backoff,
        }
    }

    fn transition(operation: &'static str, state: TransferState) {
        tracing::debug!(operation, ?state, "transfer state");
    }

    fn reject(operation: &'static str, error: LedgerError) -> LedgerError {
        Self::transition(operation, TransferState::Rejected);
        error
    }

    /// Validation shared by every operation
    fn validate(operation: &'static str, accounts: &[AccountId], amount: Money) -> Result<(), LedgerError> {
        Self::transition(operation, TransferState::Validating);

        if !amount.is_positive() {
            return Err(Self::reject(operation, LedgerError::invalid_amount(amount)));
        }
        if let [from, to] = accounts {
            if from == to {
                return Err(Self::reject(
                    operation,
                    LedgerError::SameAccountTransfer { account: *from },
                ));
            }
        }
        if accounts.contains(&CLEARING_ACCOUNT) {
            return Err(Self::reject(
                operation,
                LedgerError::account_not_found(CLEARING_ACCOUNT),
            ));
        }
        Ok(())
    }

    /// Lock `accounts`, run `apply` and commit, retrying on lock timeouts
    fn run_locked<F>(&self, operation: &'static str, accounts: &[AccountId], apply: F) -> Result<Transaction, LedgerError>
    where
        F: Fn(&mut dyn LedgerUnit) -> Result<Transaction, LedgerError>,
    {
        let result = with_lock_retries(self.lock_retries, self.retry_backoff, operation, |attempt| {
            Self::transition(operation, TransferState::Locking);
            let result = self.store.with_exclusive_accounts(accounts, |unit| {
                Self::transition(operation, TransferState::Applying);
                apply(unit)
            });
            if let Err(error) = &result {
                tracing::debug!(operation, attempt, %error, "attempt aborted");
                Self::transition(operation, TransferState::Aborted);
            }
            result
        });

        if let Ok(transaction) = &result {
            Self::transition(operation, TransferState::Committed);
            tracing::debug!(operation, transaction = transaction.id, "committed");
        }
        result
    }

    /// Move `amount` from one customer account to another
    ///
    /// Writes one TRANSFER transaction with DEBIT(amount) on the source and
    /// CREDIT(amount) on the destination.
    ///
    /// # Arguments
    ///
    /// * `from` - Source account, must hold at least `amount`
    /// * `to` - Destination account
    /// * `amount` - Positive amount in minor units
    /// * `description` - Defaults to "Transfer between accounts"
    ///
    /// # Returns
    ///
    /// The committed transaction with its two entries
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `amount <= 0`
    /// - `SameAccountTransfer` if `from == to`
    /// - `AccountNotFound` if either account does not exist
    /// - `InsufficientFunds` if the source balance is below `amount`
    /// - `LockTimeout` once every retry timed out
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Money,
        description: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        const OPERATION: &str = "transfer";

        Self::validate(OPERATION, &[from, to], amount)?;

        let description = description.unwrap_or_else(|| DEFAULT_TRANSFER_DESCRIPTION.to_string());

        self.run_locked(OPERATION, &[from, to], |unit| {
            let available = unit.account(from)?.balance;
            unit.account(to)?;
            if available < amount {
                return Err(LedgerError::insufficient_funds(from, available, amount));
            }

            unit.append_transaction(
                TransactionType::Transfer,
                Some(description.clone()),
                vec![NewEntry::debit(from, amount), NewEntry::credit(to, amount)],
            )
        })
    }

    /// Bring `amount` into the ledger on a customer account
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `amount <= 0`
    /// - `AccountNotFound` if the account does not exist
    /// - `LockTimeout` once every retry timed out
    pub fn deposit(
        &self,
        account_id: AccountId,
        amount: Money,
        description: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        const OPERATION: &str = "deposit";

        Self::validate(OPERATION, &[account_id], amount)?;

        self.run_locked(OPERATION, &[account_id], |unit| {
            unit.account(account_id)?;
            unit.append_transaction(
                TransactionType::Deposit,
                description.clone(),
                deposit_entries(account_id, amount),
            )
        })
    }

    /// Take `amount` out of the ledger from a customer account
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `amount <= 0`
    /// - `AccountNotFound` if the account does not exist
    /// - `InsufficientFunds` if the balance is below `amount`
    /// - `LockTimeout` once every retry timed out
    pub fn withdraw(
        &self,
        account_id: AccountId,
        amount: Money,
        description: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        const OPERATION: &str = "withdraw";

        Self::validate(OPERATION, &[account_id], amount)?;

        self.run_locked(OPERATION, &[account_id], |unit| {
            let available = unit.account(account_id)?.balance;
            if available < amount {
                return Err(LedgerError::insufficient_funds(account_id, available, amount));
            }

            unit.append_transaction(
                TransactionType::Withdrawal,
                description.clone(),
                vec![
                    NewEntry::debit(account_id, amount),
                    NewEntry::credit(CLEARING_ACCOUNT, amount),
                ],
            )
        })
    }
}

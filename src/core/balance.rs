//! Balance reads
//!
//! The cached balance on an account is a materialized projection of its
//! entries, updated inside the same atomic unit that appends them. Reads come
//! from committed state only; `verify` recomputes the projection by replay.

use crate::core::traits::LedgerStore;
use crate::types::{AccountId, LedgerError, Money};

/// Reads committed balances from a store
#[derive(Debug)]
pub struct BalanceAccessor<'a, S> {
    store: &'a S,
}

impl<'a, S: LedgerStore> BalanceAccessor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Current committed balance
    ///
    /// Never reflects a unit of work that has not committed.
    ///
    /// # Errors
    ///
    /// `AccountNotFound` for unknown accounts.
    pub fn get_balance(&self, account_id: AccountId) -> Result<Money, LedgerError> {
        self.store.committed_balance(account_id)
    }

    /// Balance recomputed from the account's committed entries
    pub fn replay_balance(&self, account_id: AccountId) -> Result<Money, LedgerError> {
        self.store.replay_balance(account_id)
    }

    /// Check that the cached balance equals its replay
    ///
    /// # Errors
    ///
    /// `IntegrityViolation` if they differ.
    pub fn verify(&self, account_id: AccountId) -> Result<Money, LedgerError> {
        let (cached, replayed) = self.store.balance_snapshot(account_id)?;

        if cached != replayed {
            tracing::warn!(account = account_id, %cached, %replayed, "balance does not match entry log");
            return Err(LedgerError::integrity(format!(
                "account {account_id} caches {cached} but its entries sum to {replayed}"
            )));
        }
        Ok(cached)
    }
}

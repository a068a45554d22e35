//! In-memory ledger store
//!
//! # Design
//!
//! Committed state lives behind a single `parking_lot::RwLock`. Writers never
//! mutate it in place while a unit of work runs: a unit copies the accounts it
//! locked, stages its transactions, and publishes everything under one write
//! lock on commit. Readers therefore always see either all or none of a unit.
//!
//! Exclusive access to accounts is separate from the state lock. Each account
//! has its own mutex in a `DashMap`, acquired with a bounded wait in ascending
//! id order. Units on disjoint accounts run in parallel; units on a shared
//! account serialize on that account's mutex.
//!
//! The per-date account-number sequence is a `DashMap` entry. Holding the entry
//! guard while the account is inserted serializes creations for the same date,
//! and the counter only advances when the insert commits.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use super::{audit_ledger, deposit_entries, entry_effects, lock_order, seed_description};
use crate::core::account_number::AccountNumberGenerator;
use crate::core::clock::Clock;
use crate::core::history::HistoryOrder;
use crate::core::traits::{AuditReport, LedgerStore, LedgerUnit};
use crate::types::{
    validate_entries, Account, AccountId, CustomerId, Entry, LedgerError, Money, NewEntry,
    Transaction, TransactionId, TransactionType,
};

/// Committed ledger state
#[derive(Debug)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    numbers: HashSet<String>,
    transactions: BTreeMap<TransactionId, Transaction>,
    /// Transactions with at least one entry on each account (clearing included)
    postings: HashMap<AccountId, Vec<TransactionId>>,
    clearing_balance: Money,
    next_account_id: AccountId,
}

impl LedgerState {
    fn new() -> Self {
        Self {
            accounts: HashMap::new(),
            numbers: HashSet::new(),
            transactions: BTreeMap::new(),
            postings: HashMap::new(),
            clearing_balance: Money::ZERO,
            next_account_id: 1,
        }
    }

    fn account(&self, account_id: AccountId) -> Result<&Account, LedgerError> {
        self.accounts
            .get(&account_id)
            .ok_or(LedgerError::account_not_found(account_id))
    }

    /// Sum of the account's committed entries
    fn replay(&self, account_id: AccountId) -> Result<Money, LedgerError> {
        let mut balance = Money::ZERO;
        for transaction_id in self.postings.get(&account_id).into_iter().flatten() {
            if let Some(transaction) = self.transactions.get(transaction_id) {
                balance = balance.checked_add(transaction.effect_on(account_id)?)?;
            }
        }
        Ok(balance)
    }

    fn publish(&mut self, transaction: Transaction) {
        let mut touched: Vec<AccountId> = transaction
            .entries
            .iter()
            .map(|entry| entry.account_id)
            .collect();
        touched.sort_unstable();
        touched.dedup();

        for account_id in touched {
            self.postings.entry(account_id).or_default().push(transaction.id);
        }
        self.transactions.insert(transaction.id, transaction);
    }
}

/// Ledger store kept entirely in process memory
pub struct MemoryLedgerStore {
    state: RwLock<LedgerState>,
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
    daily_sequences: DashMap<NaiveDate, u32>,
    next_transaction_id: AtomicU64,
    next_entry_id: AtomicU64,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl std::fmt::Debug for MemoryLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLedgerStore")
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

impl MemoryLedgerStore {
    /// Create an empty store
    ///
    /// # Arguments
    ///
    /// * `clock` - Timestamps committed transactions
    /// * `lock_timeout` - Longest wait to acquire all of a unit's account locks
    pub fn new(clock: Arc<dyn Clock>, lock_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(LedgerState::new()),
            locks: DashMap::new(),
            daily_sequences: DashMap::new(),
            next_transaction_id: AtomicU64::new(1),
            next_entry_id: AtomicU64::new(1),
            clock,
            lock_timeout,
        }
    }

    /// Every customer account, ordered by id
    pub fn accounts(&self) -> Vec<Account> {
        let state = self.state.read();
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by_key(|account| account.id);
        accounts
    }

    /// Last sequence committed for a date (0 if none)
    pub fn daily_sequence(&self, date: NaiveDate) -> u32 {
        self.daily_sequences
            .get(&date)
            .map(|sequence| *sequence)
            .unwrap_or(0)
    }

    fn lock_handle(&self, account_id: AccountId) -> Arc<Mutex<()>> {
        self.locks.entry(account_id).or_default().value().clone()
    }

    /// Assign ids and a timestamp to a batch of validated entries
    fn build_transaction(
        &self,
        transaction_type: TransactionType,
        description: Option<String>,
        entries: Vec<NewEntry>,
    ) -> Transaction {
        let id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        let entries = entries
            .into_iter()
            .map(|entry| Entry {
                id: self.next_entry_id.fetch_add(1, Ordering::Relaxed),
                transaction_id: id,
                account_id: entry.account_id,
                entry_type: entry.entry_type,
                amount: entry.amount,
            })
            .collect();

        Transaction {
            id,
            transaction_type,
            description,
            timestamp: self.clock.now(),
            entries,
        }
    }

    /// Insert a new account row (and its seed deposit) under the state lock
    fn insert_account(
        &self,
        number: &str,
        customer_id: CustomerId,
        initial_deposit: Money,
    ) -> Result<Account, LedgerError> {
        let mut state = self.state.write();
        if state.numbers.contains(number) {
            return Err(LedgerError::duplicate_account_number(number));
        }

        let clearing_balance = state.clearing_balance.checked_sub(initial_deposit)?;
        let id = state.next_account_id;
        let mut account = Account::new(id, number.to_string(), customer_id, self.clock.now());

        let seed = if initial_deposit.is_positive() {
            account.balance = initial_deposit;
            Some(self.build_transaction(
                TransactionType::Deposit,
                Some(seed_description(initial_deposit)),
                deposit_entries(id, initial_deposit),
            ))
        } else {
            None
        };

        state.next_account_id += 1;
        state.numbers.insert(account.number.clone());
        state.accounts.insert(id, account.clone());
        if let Some(seed) = seed {
            state.clearing_balance = clearing_balance;
            state.publish(seed);
        }

        Ok(account)
    }

    /// Publish a unit's staged writes atomically
    fn commit(&self, unit: MemoryUnit<'_>) -> Result<(), LedgerError> {
        if unit.staged.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write();
        let clearing_balance = state.clearing_balance.checked_add(unit.clearing_delta)?;

        for (account_id, account) in unit.accounts {
            if let Some(committed) = state.accounts.get_mut(&account_id) {
                committed.balance = account.balance;
            }
        }
        state.clearing_balance = clearing_balance;
        for transaction in unit.staged {
            state.publish(transaction);
        }

        Ok(())
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn create_account(
        &self,
        customer_id: CustomerId,
        initial_deposit: Money,
        numbers: &AccountNumberGenerator,
    ) -> Result<Account, LedgerError> {
        if initial_deposit.is_negative() {
            return Err(LedgerError::invalid_amount(initial_deposit));
        }

        let date = numbers.today();
        let mut sequence = self.daily_sequences.entry(date).or_insert(0);
        let next = sequence.saturating_add(1);

        let account = numbers.allocate(date, next, |candidate| {
            self.insert_account(candidate, customer_id, initial_deposit)
        })?;

        *sequence = next;
        tracing::debug!(account = account.id, number = %account.number, "account created");
        Ok(account)
    }

    fn get_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.state
            .read()
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or(LedgerError::account_not_found(account_id))
    }

    fn with_exclusive_accounts<T, F>(&self, account_ids: &[AccountId], f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut dyn LedgerUnit) -> Result<T, LedgerError>,
    {
        let ordered = lock_order(account_ids);

        {
            let state = self.state.read();
            if let Some(missing) = ordered.iter().find(|id| !state.accounts.contains_key(id)) {
                return Err(LedgerError::account_not_found(*missing));
            }
        }

        let handles: Vec<(AccountId, Arc<Mutex<()>>)> = ordered
            .iter()
            .map(|id| (*id, self.lock_handle(*id)))
            .collect();

        // One deadline bounds the whole acquisition, not each lock
        let deadline = Instant::now() + self.lock_timeout;
        let mut guards = Vec::with_capacity(handles.len());
        for (account_id, handle) in &handles {
            match handle.try_lock_until(deadline) {
                Some(guard) => guards.push(guard),
                None => {
                    tracing::debug!(account = account_id, "lock wait timed out");
                    return Err(LedgerError::lock_timeout(*account_id, self.lock_timeout));
                }
            }
        }

        // Re-read under the locks: balances may have moved while we waited
        let accounts = {
            let state = self.state.read();
            ordered
                .iter()
                .map(|id| {
                    state
                        .accounts
                        .get(id)
                        .cloned()
                        .map(|account| (*id, account))
                        .ok_or(LedgerError::account_not_found(*id))
                })
                .collect::<Result<HashMap<_, _>, _>>()?
        };

        let mut unit = MemoryUnit {
            store: self,
            accounts,
            staged: Vec::new(),
            clearing_delta: Money::ZERO,
        };

        let value = f(&mut unit)?;
        self.commit(unit)?;
        drop(guards);

        Ok(value)
    }

    fn committed_balance(&self, account_id: AccountId) -> Result<Money, LedgerError> {
        self.state
            .read()
            .accounts
            .get(&account_id)
            .map(|account| account.balance)
            .ok_or(LedgerError::account_not_found(account_id))
    }

    fn replay_balance(&self, account_id: AccountId) -> Result<Money, LedgerError> {
        let state = self.state.read();
        state.account(account_id)?;
        state.replay(account_id)
    }

    fn balance_snapshot(&self, account_id: AccountId) -> Result<(Money, Money), LedgerError> {
        let state = self.state.read();
        let cached = state.account(account_id)?.balance;
        Ok((cached, state.replay(account_id)?))
    }

    fn history(
        &self,
        account_id: AccountId,
        order: HistoryOrder,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let state = self.state.read();
        if !state.accounts.contains_key(&account_id) {
            return Err(LedgerError::account_not_found(account_id));
        }

        let mut touching: Vec<&Transaction> = state
            .postings
            .get(&account_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.transactions.get(id))
            .collect();

        touching.sort_by_key(|transaction| (transaction.timestamp, transaction.id));
        if order == HistoryOrder::NewestFirst {
            touching.reverse();
        }

        Ok(touching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn audit(&self) -> Result<AuditReport, LedgerError> {
        let state = self.state.read();
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by_key(|account| account.id);

        audit_ledger(&accounts, state.clearing_balance, state.transactions.values())
    }
}

/// Unit of work over a set of locked accounts
struct MemoryUnit<'a> {
    store: &'a MemoryLedgerStore,
    accounts: HashMap<AccountId, Account>,
    staged: Vec<Transaction>,
    clearing_delta: Money,
}

impl LedgerUnit for MemoryUnit<'_> {
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
        let effects = entry_effects(&self.accounts, &entries)?;
        let clearing_delta = self.clearing_delta.checked_add(effects.clearing_delta)?;

        for (account_id, balance) in effects.balances {
            if let Some(account) = self.accounts.get_mut(&account_id) {
                account.balance = balance;
            }
        }
        self.clearing_delta = clearing_delta;

        let transaction = self
            .store
            .build_transaction(transaction_type, description, entries);
        self.staged.push(transaction.clone());
        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use crate::core::random::{ScriptedRandom, SeededRandom};
    use crate::types::{EntryType, CLEARING_ACCOUNT};
    use std::sync::mpsc;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 12, 15).unwrap()
    }

    fn store_with_timeout(lock_timeout: Duration) -> (MemoryLedgerStore, AccountNumberGenerator) {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::on(date()));
        let numbers = AccountNumberGenerator::new(clock.clone(), Arc::new(SeededRandom::new(42)), 5);
        (MemoryLedgerStore::new(clock, lock_timeout), numbers)
    }

    fn store() -> (MemoryLedgerStore, AccountNumberGenerator) {
        store_with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_create_account_with_seed_deposit() {
        let (store, numbers) = store();
        let account = store
            .create_account(7, Money::from_minor(100_000), &numbers)
            .unwrap();

        assert_eq!(account.id, 1);
        assert_eq!(account.customer_id, 7);
        assert_eq!(account.balance, Money::from_minor(100_000));
        assert!(account.number.starts_with("2023121500001"));

        let history = store
            .history(account.id, HistoryOrder::NewestFirst, 0, 10)
            .unwrap();
        assert_eq!(history.len(), 1);
        let seed = &history[0];
        assert_eq!(seed.transaction_type, TransactionType::Deposit);
        assert_eq!(seed.description.as_deref(), Some("Initial deposit of $1000.00"));
        assert_eq!(seed.entries.len(), 2);
        assert_eq!(seed.entries[0].account_id, CLEARING_ACCOUNT);
        assert_eq!(seed.entries[0].entry_type, EntryType::Debit);
        assert_eq!(seed.entries[1].account_id, account.id);
        assert_eq!(seed.entries[1].entry_type, EntryType::Credit);

        assert_eq!(store.replay_balance(account.id).unwrap(), account.balance);
        assert!(store.audit().is_ok());
    }

    #[test]
    fn test_create_account_without_deposit_writes_no_transaction() {
        let (store, numbers) = store();
        let account = store.create_account(1, Money::ZERO, &numbers).unwrap();

        assert_eq!(account.balance, Money::ZERO);
        assert!(store
            .history(account.id, HistoryOrder::NewestFirst, 0, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_create_account_rejects_negative_deposit() {
        let (store, numbers) = store();
        assert!(matches!(
            store.create_account(1, Money::from_minor(-1), &numbers),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert_eq!(store.daily_sequence(date()), 0);
    }

    #[test]
    fn test_sequence_increments_per_account() {
        let (store, numbers) = store();
        let first = store.create_account(1, Money::ZERO, &numbers).unwrap();
        let second = store.create_account(1, Money::ZERO, &numbers).unwrap();

        assert_eq!(&first.number[8..13], "00001");
        assert_eq!(&second.number[8..13], "00002");
        assert_eq!(store.daily_sequence(date()), 2);
    }

    #[test]
    fn test_sequence_exhaustion_leaves_counter_unchanged() {
        let (store, numbers) = store();
        store.daily_sequences.insert(date(), 99_999);

        assert!(matches!(
            store.create_account(1, Money::ZERO, &numbers),
            Err(LedgerError::AccountNumberGenerationExhausted { .. })
        ));
        assert_eq!(store.daily_sequence(date()), 99_999);
        assert!(store.accounts().is_empty());
    }

    #[test]
    fn test_duplicate_number_is_regenerated() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::on(date()));
        let store = MemoryLedgerStore::new(clock.clone(), Duration::from_secs(1));
        store.state.write().numbers.insert("2023121500001AAA".to_string());

        let numbers = AccountNumberGenerator::new(clock, Arc::new(ScriptedRandom::new(["AAA", "BBB"])), 5);
        let account = store.create_account(1, Money::ZERO, &numbers).unwrap();
        assert_eq!(account.number, "2023121500001BBB");
    }

    #[test]
    fn test_clearing_account_is_not_a_customer_account() {
        let (store, _) = store();
        assert_eq!(
            store.get_account(CLEARING_ACCOUNT),
            Err(LedgerError::account_not_found(CLEARING_ACCOUNT))
        );
    }

    #[test]
    fn test_failed_unit_discards_staged_writes() {
        let (store, numbers) = store();
        let account = store.create_account(1, Money::from_minor(500), &numbers).unwrap();

        let result: Result<(), _> = store.with_exclusive_accounts(&[account.id], |unit| {
            unit.append_transaction(
                TransactionType::Deposit,
                None,
                deposit_entries(account.id, Money::from_minor(300)),
            )?;
            assert_eq!(unit.account(account.id)?.balance, Money::from_minor(800));
            Err(LedgerError::storage("simulated failure"))
        });

        assert!(result.is_err());
        assert_eq!(store.committed_balance(account.id).unwrap(), Money::from_minor(500));
        assert_eq!(
            store
                .history(account.id, HistoryOrder::NewestFirst, 0, 10)
                .unwrap()
                .len(),
            1
        );
        assert!(store.audit().is_ok());
    }

    #[test]
    fn test_unit_rejects_unlocked_account() {
        let (store, numbers) = store();
        let first = store.create_account(1, Money::from_minor(500), &numbers).unwrap();
        let second = store.create_account(1, Money::ZERO, &numbers).unwrap();

        let result = store.with_exclusive_accounts(&[first.id], |unit| {
            unit.append_transaction(
                TransactionType::Transfer,
                None,
                vec![
                    NewEntry::debit(first.id, Money::from_minor(100)),
                    NewEntry::credit(second.id, Money::from_minor(100)),
                ],
            )
        });

        assert_eq!(result, Err(LedgerError::AccountNotLocked { account: second.id }));
    }

    #[test]
    fn test_unknown_account_fails_before_locking() {
        let (store, _) = store();
        let result = store.with_exclusive_accounts(&[99], |_| Ok(()));
        assert_eq!(result, Err(LedgerError::account_not_found(99)));
    }

    #[test]
    fn test_lock_wait_times_out() {
        let (store, numbers) = store_with_timeout(Duration::from_millis(50));
        let account = store.create_account(1, Money::ZERO, &numbers).unwrap();

        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                store
                    .with_exclusive_accounts(&[account.id], move |_| {
                        locked_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(())
                    })
                    .unwrap();
            });

            locked_rx.recv().unwrap();
            let result = store.with_exclusive_accounts(&[account.id], |_| Ok(()));
            release_tx.send(()).unwrap();

            assert!(matches!(result, Err(LedgerError::LockTimeout { account: id, .. }) if id == account.id));
        });
    }

    #[test]
    fn test_lock_timeout_bounds_whole_acquisition() {
        let (store, numbers) = store_with_timeout(Duration::from_millis(400));
        let first = store.create_account(1, Money::ZERO, &numbers).unwrap();
        let second = store.create_account(1, Money::ZERO, &numbers).unwrap();

        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        std::thread::scope(|scope| {
            let first_locked = locked_tx.clone();
            scope.spawn(|| {
                store
                    .with_exclusive_accounts(&[first.id], move |_| {
                        first_locked.send(()).unwrap();
                        std::thread::sleep(Duration::from_millis(300));
                        Ok(())
                    })
                    .unwrap();
            });
            scope.spawn(|| {
                store
                    .with_exclusive_accounts(&[second.id], move |_| {
                        locked_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(())
                    })
                    .unwrap();
            });

            locked_rx.recv().unwrap();
            locked_rx.recv().unwrap();
            let started = Instant::now();
            let result = store.with_exclusive_accounts(&[first.id, second.id], |_| Ok(()));
            let waited = started.elapsed();
            release_tx.send(()).unwrap();

            assert!(matches!(result, Err(LedgerError::LockTimeout { account: id, .. }) if id == second.id));
            // the first lock used most of the budget; the second only gets what is left
            assert!(waited < Duration::from_millis(600), "waited {waited:?}");
        });
    }

    #[test]
    fn test_history_orders_and_paginates() {
        let (store, numbers) = store();
        let account = store.create_account(1, Money::from_minor(100), &numbers).unwrap();
        for amount in [10, 20, 30] {
            store
                .append_transaction(
                    TransactionType::Deposit,
                    None,
                    deposit_entries(account.id, Money::from_minor(amount)),
                )
                .unwrap();
        }

        let newest: Vec<TransactionId> = store
            .history(account.id, HistoryOrder::NewestFirst, 0, 10)
            .unwrap()
            .iter()
            .map(|transaction| transaction.id)
            .collect();
        assert_eq!(newest, vec![4, 3, 2, 1]);

        let page: Vec<TransactionId> = store
            .history(account.id, HistoryOrder::OldestFirst, 1, 2)
            .unwrap()
            .iter()
            .map(|transaction| transaction.id)
            .collect();
        assert_eq!(page, vec![2, 3]);
    }
}

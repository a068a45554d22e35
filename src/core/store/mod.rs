//! Ledger store backends
//!
//! - `memory` - in-process store with per-account locks (`DashMap` + `parking_lot`)
//! - `sqlite` - durable store on SQLite (`rusqlite`), one database transaction per unit
//!
//! Both backends share the helpers below for lock ordering, staging entry
//! effects against locked accounts, and auditing.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryLedgerStore;
pub use sqlite::SqliteLedgerStore;

use std::collections::{BTreeMap, HashMap};

use crate::core::traits::AuditReport;
use crate::types::{
    Account, AccountId, LedgerError, Money, NewEntry, Transaction, CLEARING_ACCOUNT,
};

/// Canonical lock order: ascending, deduplicated, clearing account excluded
pub(crate) fn lock_order(account_ids: &[AccountId]) -> Vec<AccountId> {
    let mut ordered: Vec<AccountId> = account_ids
        .iter()
        .copied()
        .filter(|id| *id != CLEARING_ACCOUNT)
        .collect();
    ordered.sort_unstable();
    ordered.dedup();
    ordered
}

/// Balances resulting from applying a set of entries to locked accounts
#[derive(Debug, Default)]
pub(crate) struct EntryEffects {
    /// New balance of every customer account the entries touch
    pub balances: BTreeMap<AccountId, Money>,
    /// Net change of the clearing account
    pub clearing_delta: Money,
}

/// Compute the effect of `entries` on the locked accounts without mutating them
///
/// # Errors
///
/// - `AccountNotLocked` if an entry references an account that is not locked
/// - `InsufficientFunds` if a customer balance would become negative
/// - `AmountOverflow` on overflow
pub(crate) fn entry_effects(
    accounts: &HashMap<AccountId, Account>,
    entries: &[NewEntry],
) -> Result<EntryEffects, LedgerError> {
    let mut effects = EntryEffects::default();

    for entry in entries {
        let signed = entry.signed_amount()?;

        if entry.account_id == CLEARING_ACCOUNT {
            effects.clearing_delta = effects.clearing_delta.checked_add(signed)?;
            continue;
        }

        let account = accounts
            .get(&entry.account_id)
            .ok_or(LedgerError::AccountNotLocked {
                account: entry.account_id,
            })?;
        let current = effects
            .balances
            .get(&entry.account_id)
            .copied()
            .unwrap_or(account.balance);
        effects
            .balances
            .insert(entry.account_id, current.checked_add(signed)?);
    }

    for (account_id, balance) in &effects.balances {
        if balance.is_negative() {
            let available = accounts
                .get(account_id)
                .map(|account| account.balance)
                .unwrap_or_default();
            return Err(LedgerError::insufficient_funds(
                *account_id,
                available,
                available.checked_sub(*balance)?,
            ));
        }
    }

    Ok(effects)
}

/// Description of the seed deposit written when an account is opened
pub(crate) fn seed_description(deposit: Money) -> String {
    format!("Initial deposit of ${:.2}", deposit.to_major())
}

/// Entries of a deposit from outside the ledger into an account
pub(crate) fn deposit_entries(account_id: AccountId, amount: Money) -> Vec<NewEntry> {
    vec![
        NewEntry::debit(CLEARING_ACCOUNT, amount),
        NewEntry::credit(account_id, amount),
    ]
}

/// Replay every committed transaction against the cached balances
///
/// Checks that each transaction nets to zero, that each cached customer
/// balance equals its replay and is non-negative, and that the clearing
/// balance offsets the sum of customer balances.
///
/// # Errors
///
/// `IntegrityViolation` for the first mismatch found.
pub(crate) fn audit_ledger<'a, I>(
    accounts: &[Account],
    clearing_balance: Money,
    transactions: I,
) -> Result<AuditReport, LedgerError>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut replayed: HashMap<AccountId, Money> = HashMap::new();
    let mut transaction_count = 0;
    let mut entry_count = 0;

    for transaction in transactions {
        let net = transaction.net_amount()?;
        if net != Money::ZERO {
            return Err(LedgerError::integrity(format!(
                "transaction {} nets to {}",
                transaction.id, net
            )));
        }

        for entry in &transaction.entries {
            if !entry.amount.is_positive() {
                return Err(LedgerError::integrity(format!(
                    "entry {} has non-positive amount {}",
                    entry.id, entry.amount
                )));
            }
            let balance = replayed.entry(entry.account_id).or_default();
            *balance = balance.checked_add(entry.signed_amount()?)?;
        }

        transaction_count += 1;
        entry_count += transaction.entries.len();
    }

    let mut customer_total = Money::ZERO;
    for account in accounts {
        let expected = replayed.get(&account.id).copied().unwrap_or_default();
        if account.balance != expected {
            return Err(LedgerError::integrity(format!(
                "account {} caches {} but its entries sum to {}",
                account.id, account.balance, expected
            )));
        }
        if account.balance.is_negative() {
            return Err(LedgerError::integrity(format!(
                "account {} has negative balance {}",
                account.id, account.balance
            )));
        }
        customer_total = customer_total.checked_add(account.balance)?;
    }

    let replayed_clearing = replayed
        .get(&CLEARING_ACCOUNT)
        .copied()
        .unwrap_or_default();
    if replayed_clearing != clearing_balance {
        return Err(LedgerError::integrity(format!(
            "clearing account caches {} but its entries sum to {}",
            clearing_balance, replayed_clearing
        )));
    }

    if customer_total.checked_add(clearing_balance)? != Money::ZERO {
        return Err(LedgerError::integrity(format!(
            "customer balances {} do not offset clearing balance {}",
            customer_total, clearing_balance
        )));
    }

    Ok(AuditReport {
        accounts: accounts.len(),
        transactions: transaction_count,
        entries: entry_count,
        customer_total,
        clearing_balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entry, EntryType, TransactionType};
    use chrono::Utc;

    fn account(id: AccountId, balance: i64) -> Account {
        Account {
            id,
            number: format!("2023121500{:03}ABC", id),
            customer_id: 1,
            balance: Money::from_minor(balance),
            created_at: Utc::now(),
        }
    }

    fn locked(accounts: &[Account]) -> HashMap<AccountId, Account> {
        accounts
            .iter()
            .map(|account| (account.id, account.clone()))
            .collect()
    }

    fn transaction(id: u64, legs: &[(AccountId, EntryType, i64)]) -> Transaction {
        Transaction {
            id,
            transaction_type: TransactionType::Transfer,
            description: None,
            timestamp: Utc::now(),
            entries: legs
                .iter()
                .enumerate()
                .map(|(index, (account_id, entry_type, amount))| Entry {
                    id: id * 10 + index as u64,
                    transaction_id: id,
                    account_id: *account_id,
                    entry_type: *entry_type,
                    amount: Money::from_minor(*amount),
                })
                .collect(),
        }
    }

    #[test]
    fn test_lock_order_sorts_dedups_and_skips_clearing() {
        assert_eq!(lock_order(&[9, 3, CLEARING_ACCOUNT, 9, 1]), vec![1, 3, 9]);
        assert!(lock_order(&[CLEARING_ACCOUNT]).is_empty());
    }

    #[test]
    fn test_entry_effects_transfer() {
        let accounts = locked(&[account(1, 1000), account(2, 500)]);
        let entries = [
            NewEntry::debit(1, Money::from_minor(300)),
            NewEntry::credit(2, Money::from_minor(300)),
        ];

        let effects = entry_effects(&accounts, &entries).unwrap();
        assert_eq!(effects.balances[&1], Money::from_minor(700));
        assert_eq!(effects.balances[&2], Money::from_minor(800));
        assert_eq!(effects.clearing_delta, Money::ZERO);
    }

    #[test]
    fn test_entry_effects_insufficient_funds() {
        let accounts = locked(&[account(1, 700), account(2, 800)]);
        let entries = [
            NewEntry::debit(1, Money::from_minor(5000)),
            NewEntry::credit(2, Money::from_minor(5000)),
        ];

        assert_eq!(
            entry_effects(&accounts, &entries).unwrap_err(),
            LedgerError::insufficient_funds(1, Money::from_minor(700), Money::from_minor(5000))
        );
    }

    #[test]
    fn test_entry_effects_requires_lock() {
        let accounts = locked(&[account(1, 1000)]);
        let entries = [
            NewEntry::debit(1, Money::from_minor(10)),
            NewEntry::credit(2, Money::from_minor(10)),
        ];

        assert_eq!(
            entry_effects(&accounts, &entries).unwrap_err(),
            LedgerError::AccountNotLocked { account: 2 }
        );
    }

    #[test]
    fn test_entry_effects_clearing_needs_no_lock() {
        let accounts = locked(&[account(4, 0)]);
        let effects = entry_effects(&accounts, &deposit_entries(4, Money::from_minor(250))).unwrap();

        assert_eq!(effects.balances[&4], Money::from_minor(250));
        assert_eq!(effects.clearing_delta, Money::from_minor(-250));
    }

    #[test]
    fn test_seed_description() {
        assert_eq!(
            seed_description(Money::from_minor(100_000)),
            "Initial deposit of $1000.00"
        );
    }

    #[test]
    fn test_audit_accepts_consistent_ledger() {
        let accounts = [account(1, 700), account(2, 800)];
        let transactions = [
            transaction(1, &[(CLEARING_ACCOUNT, EntryType::Debit, 1000), (1, EntryType::Credit, 1000)]),
            transaction(2, &[(CLEARING_ACCOUNT, EntryType::Debit, 500), (2, EntryType::Credit, 500)]),
            transaction(3, &[(1, EntryType::Debit, 300), (2, EntryType::Credit, 300)]),
        ];

        let report = audit_ledger(&accounts, Money::from_minor(-1500), &transactions).unwrap();
        assert_eq!(report.accounts, 2);
        assert_eq!(report.transactions, 3);
        assert_eq!(report.entries, 6);
        assert_eq!(report.customer_total, Money::from_minor(1500));
    }

    #[test]
    fn test_audit_detects_stale_cache() {
        let accounts = [account(1, 999)];
        let transactions = [transaction(
            1,
            &[(CLEARING_ACCOUNT, EntryType::Debit, 1000), (1, EntryType::Credit, 1000)],
        )];

        assert!(matches!(
            audit_ledger(&accounts, Money::from_minor(-1000), &transactions),
            Err(LedgerError::IntegrityViolation { .. })
        ));
    }

    #[test]
    fn test_audit_detects_unbalanced_transaction() {
        let accounts = [account(1, 1000)];
        let transactions = [transaction(1, &[(1, EntryType::Credit, 1000)])];

        assert!(matches!(
            audit_ledger(&accounts, Money::ZERO, &transactions),
            Err(LedgerError::IntegrityViolation { .. })
        ));
    }
}

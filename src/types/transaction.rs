//! Transaction-related types for the ledger
//!
//! A `Transaction` is one immutable financial event made of `Entry` lines.
//! DEBIT entries count negative and CREDIT entries count positive; the signed
//! sum of a committed transaction's entries is always zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::error::LedgerError;
use super::money::Money;

/// Transaction identifier
pub type TransactionId = u64;

/// Entry identifier
pub type EntryId = u64;

/// Kind of financial event a transaction records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    /// Money entering the ledger, including the seed deposit of a new account
    Deposit,

    /// Money moving between two customer accounts
    Transfer,

    /// Money leaving the ledger
    Withdrawal,
}

impl TransactionType {
    /// Storage representation
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Transfer => "TRANSFER",
            TransactionType::Withdrawal => "WITHDRAWAL",
        }
    }

    /// Parse the storage representation
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DEPOSIT" => Some(TransactionType::Deposit),
            "TRANSFER" => Some(TransactionType::Transfer),
            "WITHDRAWAL" => Some(TransactionType::Withdrawal),
            _ => None,
        }
    }
}

/// Side of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    /// Decreases the referenced account's balance
    Debit,

    /// Increases the referenced account's balance
    Credit,
}

impl EntryType {
    /// Signed effect of an entry of this type on its account's balance
    ///
    /// # Errors
    ///
    /// `AmountOverflow` when negating `i64::MIN`.
    pub fn signed(self, amount: Money) -> Result<Money, LedgerError> {
        match self {
            EntryType::Credit => Ok(amount),
            EntryType::Debit => amount.checked_neg(),
        }
    }

    /// Storage representation
    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::Debit => "DEBIT",
            EntryType::Credit => "CREDIT",
        }
    }

    /// Parse the storage representation
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DEBIT" => Some(EntryType::Debit),
            "CREDIT" => Some(EntryType::Credit),
            _ => None,
        }
    }
}

/// Entry that has not been committed yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub entry_type: EntryType,
    pub amount: Money,
}

impl NewEntry {
    pub fn debit(account_id: AccountId, amount: Money) -> Self {
        NewEntry {
            account_id,
            entry_type: EntryType::Debit,
            amount,
        }
    }

    pub fn credit(account_id: AccountId, amount: Money) -> Self {
        NewEntry {
            account_id,
            entry_type: EntryType::Credit,
            amount,
        }
    }

    /// Signed effect on the referenced account's balance
    pub fn signed_amount(&self) -> Result<Money, LedgerError> {
        self.entry_type.signed(self.amount)
    }
}

/// Validate a set of entries before it is written as one transaction
///
/// # Errors
///
/// - `EntryAmountNotPositive` if any entry amount is `<= 0` (checked first)
/// - `UnbalancedTransaction` if the set is empty or the debits and credits differ
/// - `AmountOverflow` if a side's total overflows
pub fn validate_entries(entries: &[NewEntry]) -> Result<(), LedgerError> {
    if let Some(entry) = entries.iter().find(|entry| !entry.amount.is_positive()) {
        return Err(LedgerError::EntryAmountNotPositive {
            account: entry.account_id,
            amount: entry.amount,
        });
    }

    let side_total = |side: EntryType| {
        Money::sum(
            entries
                .iter()
                .filter(|entry| entry.entry_type == side)
                .map(|entry| entry.amount),
        )
    };
    let debits = side_total(EntryType::Debit)?;
    let credits = side_total(EntryType::Credit)?;

    if entries.is_empty() || debits != credits {
        return Err(LedgerError::UnbalancedTransaction { debits, credits });
    }

    Ok(())
}

/// Committed entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub entry_type: EntryType,
    /// Always positive
    pub amount: Money,
}

impl Entry {
    /// Signed effect on the referenced account's balance
    pub fn signed_amount(&self) -> Result<Money, LedgerError> {
        self.entry_type.signed(self.amount)
    }
}

/// Committed transaction with its entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub transaction_type: TransactionType,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Entries in insertion order
    pub entries: Vec<Entry>,
}

impl Transaction {
    /// Signed sum of all entries (zero for every committed transaction)
    pub fn net_amount(&self) -> Result<Money, LedgerError> {
        self.entries
            .iter()
            .try_fold(Money::ZERO, |total, entry| {
                total.checked_add(entry.signed_amount()?)
            })
    }

    /// Signed effect of this transaction on one account
    pub fn effect_on(&self, account_id: AccountId) -> Result<Money, LedgerError> {
        self.entries
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .try_fold(Money::ZERO, |total, entry| {
                total.checked_add(entry.signed_amount()?)
            })
    }

    /// Whether any entry references the account
    pub fn touches(&self, account_id: AccountId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.account_id == account_id)
    }
}

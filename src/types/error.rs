//! Error types for the double-entry ledger
//!
//! This module defines all error kinds raised by the ledger core. Every core
//! operation is fail-fast: it returns one specific kind rather than a generic
//! failure, and no operation leaves partially applied state behind.
//!
//! # Error Categories
//!
//! - **Validation Errors**: invalid amounts, same-account transfers, unbalanced entries
//! - **Lookup Errors**: unknown accounts or customers
//! - **Funds Errors**: insufficient funds, arithmetic overflow
//! - **Allocation Errors**: account-number collisions and exhaustion
//! - **Concurrency Errors**: lock-wait timeouts (retryable by the caller)
//! - **Storage Errors**: backend failures and integrity violations found by the audit

use chrono::NaiveDate;
use thiserror::Error;

use super::account::{AccountId, CustomerId};
use super::money::Money;

/// Main error type for the ledger core
///
/// Each variant carries enough context for the collaborator layer to map it
/// onto a user-visible message or a transport-level status.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Amount is not an integer count of minor units, is out of range, or is
    /// not positive where positivity is required
    #[error("Invalid amount '{value}'")]
    InvalidAmount {
        /// The rejected value as it was given
        value: String,
    },

    /// Checked arithmetic on minor units overflowed
    #[error("Amount overflow in {operation}")]
    AmountOverflow {
        /// Operation that would overflow
        operation: String,
    },

    /// Account does not exist (or is the reserved clearing account)
    #[error("Account {account} not found")]
    AccountNotFound {
        /// The account id that was looked up
        account: AccountId,
    },

    /// Customer does not exist in the customer directory
    #[error("Customer {customer} not found")]
    CustomerNotFound {
        /// The customer id that was looked up
        customer: CustomerId,
    },

    /// Source and destination of a transfer are the same account
    #[error("Cannot transfer from account {account} to itself")]
    SameAccountTransfer {
        /// The account used on both sides
        account: AccountId,
    },

    /// Applying the entries would leave the account balance negative
    #[error("Insufficient funds in account {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Account that would be overdrawn
        account: AccountId,
        /// Committed balance before the operation
        available: Money,
        /// Net amount the operation tried to take out
        requested: Money,
    },

    /// Signed sum of a transaction's entries is not zero
    #[error("Unbalanced transaction: debits {debits}, credits {credits}")]
    UnbalancedTransaction {
        /// Sum of all DEBIT entry amounts
        debits: Money,
        /// Sum of all CREDIT entry amounts
        credits: Money,
    },

    /// An entry carries a zero or negative amount
    #[error("Entry amount {amount} for account {account} must be positive")]
    EntryAmountNotPositive {
        /// Account referenced by the offending entry
        account: AccountId,
        /// The offending amount
        amount: Money,
    },

    /// The generated account number collides with an existing one
    #[error("Account number {number} already exists")]
    DuplicateAccountNumber {
        /// The colliding account number
        number: String,
    },

    /// No unique account number could be produced
    #[error("Could not generate an account number for {date} after {attempts} attempts")]
    AccountNumberGenerationExhausted {
        /// Calendar date the number was generated for
        date: NaiveDate,
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// Exclusive lock on an account could not be acquired in time
    ///
    /// This is the only error a caller is expected to retry.
    #[error("Timed out after {waited_ms}ms waiting for account {account}")]
    LockTimeout {
        /// Account whose lock could not be acquired
        account: AccountId,
        /// How long the caller waited, in milliseconds
        waited_ms: u64,
    },

    /// A unit of work tried to write an account it does not hold a lock on
    #[error("Account {account} is not locked by this unit of work")]
    AccountNotLocked {
        /// The account that was written without a lock
        account: AccountId,
    },

    /// Replaying the entry log disagrees with committed state
    #[error("Integrity violation: {message}")]
    IntegrityViolation {
        /// Description of the mismatch
        message: String,
    },

    /// Backend storage failure
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the backend failure
        message: String,
    },
}

impl From<rusqlite::Error> for LedgerError {
    fn from(error: rusqlite::Error) -> Self {
        LedgerError::Storage {
            message: error.to_string(),
        }
    }
}

// Helper functions for creating common errors

impl LedgerError {
    /// Create an InvalidAmount error
    pub fn invalid_amount(value: impl ToString) -> Self {
        LedgerError::InvalidAmount {
            value: value.to_string(),
        }
    }

    /// Create an AmountOverflow error
    pub fn amount_overflow(operation: &str) -> Self {
        LedgerError::AmountOverflow {
            operation: operation.to_string(),
        }
    }

    /// Create an AccountNotFound error
    pub fn account_not_found(account: AccountId) -> Self {
        LedgerError::AccountNotFound { account }
    }

    /// Create a CustomerNotFound error
    pub fn customer_not_found(customer: CustomerId) -> Self {
        LedgerError::CustomerNotFound { customer }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(account: AccountId, available: Money, requested: Money) -> Self {
        LedgerError::InsufficientFunds {
            account,
            available,
            requested,
        }
    }

    /// Create a DuplicateAccountNumber error
    pub fn duplicate_account_number(number: &str) -> Self {
        LedgerError::DuplicateAccountNumber {
            number: number.to_string(),
        }
    }

    /// Create a LockTimeout error
    pub fn lock_timeout(account: AccountId, waited: std::time::Duration) -> Self {
        LedgerError::LockTimeout {
            account,
            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create an IntegrityViolation error
    pub fn integrity(message: impl Into<String>) -> Self {
        LedgerError::IntegrityViolation {
            message: message.into(),
        }
    }

    /// Create a Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        LedgerError::Storage {
            message: message.into(),
        }
    }

    /// Whether the core may retry the failed step on its own
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::LockTimeout { .. } | LedgerError::DuplicateAccountNumber { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case::invalid_amount(
        LedgerError::InvalidAmount { value: "12.5".to_string() },
        "Invalid amount '12.5'"
    )]
    #[case::amount_overflow(
        LedgerError::AmountOverflow { operation: "credit".to_string() },
        "Amount overflow in credit"
    )]
    #[case::account_not_found(
        LedgerError::AccountNotFound { account: 7 },
        "Account 7 not found"
    )]
    #[case::customer_not_found(
        LedgerError::CustomerNotFound { customer: 999 },
        "Customer 999 not found"
    )]
    #[case::same_account(
        LedgerError::SameAccountTransfer { account: 3 },
        "Cannot transfer from account 3 to itself"
    )]
    #[case::insufficient_funds(
        LedgerError::InsufficientFunds { account: 1, available: Money::from_minor(70000), requested: Money::from_minor(500000) },
        "Insufficient funds in account 1: available 70000, requested 500000"
    )]
    #[case::unbalanced(
        LedgerError::UnbalancedTransaction { debits: Money::from_minor(300), credits: Money::from_minor(200) },
        "Unbalanced transaction: debits 300, credits 200"
    )]
    #[case::entry_not_positive(
        LedgerError::EntryAmountNotPositive { account: 2, amount: Money::ZERO },
        "Entry amount 0 for account 2 must be positive"
    )]
    #[case::duplicate_number(
        LedgerError::DuplicateAccountNumber { number: "2023121500001ABC".to_string() },
        "Account number 2023121500001ABC already exists"
    )]
    #[case::lock_timeout(
        LedgerError::LockTimeout { account: 4, waited_ms: 250 },
        "Timed out after 250ms waiting for account 4"
    )]
    fn test_error_display(#[case] error: LedgerError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case::insufficient_funds(
        LedgerError::insufficient_funds(1, Money::from_minor(5), Money::from_minor(10)),
        LedgerError::InsufficientFunds { account: 1, available: Money::from_minor(5), requested: Money::from_minor(10) }
    )]
    #[case::account_not_found(
        LedgerError::account_not_found(42),
        LedgerError::AccountNotFound { account: 42 }
    )]
    #[case::lock_timeout(
        LedgerError::lock_timeout(9, Duration::from_millis(1500)),
        LedgerError::LockTimeout { account: 9, waited_ms: 1500 }
    )]
    #[case::invalid_amount(
        LedgerError::invalid_amount(-5),
        LedgerError::InvalidAmount { value: "-5".to_string() }
    )]
    fn test_helper_functions(#[case] result: LedgerError, #[case] expected: LedgerError) {
        assert_eq!(result, expected);
    }

    #[test]
    fn test_exhausted_display_includes_date() {
        let date = NaiveDate::from_ymd_opt(2023, 12, 15).unwrap();
        let error = LedgerError::AccountNumberGenerationExhausted { date, attempts: 5 };
        assert_eq!(
            error.to_string(),
            "Could not generate an account number for 2023-12-15 after 5 attempts"
        );
    }

    #[rstest]
    #[case(LedgerError::lock_timeout(1, Duration::from_millis(10)), true)]
    #[case(LedgerError::duplicate_account_number("X"), true)]
    #[case(LedgerError::account_not_found(1), false)]
    #[case(LedgerError::insufficient_funds(1, Money::ZERO, Money::from_minor(1)), false)]
    fn test_is_retryable(#[case] error: LedgerError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let error: LedgerError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(error, LedgerError::Storage { .. }));
    }
}

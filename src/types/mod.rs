//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `money`: Integer minor-unit amounts with checked arithmetic
//! - `account`: Account and customer records and identifiers
//! - `transaction`: Transactions, entries and entry validation
//! - `operation`: Script operations read by the CLI driver
//! - `error`: Error types for the ledger

pub mod account;
pub mod error;
pub mod money;
pub mod operation;
pub mod transaction;

pub use account::{Account, AccountId, Customer, CustomerId, CLEARING_ACCOUNT};
pub use error::LedgerError;
pub use money::Money;
pub use operation::{Operation, OperationKey, OperationKind};
pub use transaction::{
    validate_entries, Entry, EntryId, EntryType, NewEntry, Transaction, TransactionId,
    TransactionType,
};

//! Double-Entry Ledger Library
//! # Overview
//!
//! A banking ledger core. Every movement of money is one transaction made of
//! DEBIT and CREDIT entries that sum to zero; account balances are a cache of
//! the entry log, kept consistent with it by atomic, ordered-lock units of
//! work. A CSV script driver with a sync and an async strategy sits on top.
//!
//! # Architecture
//!
//! - [`types`] - Core data types (Money, Account, Transaction, Entry, errors)
//! - [`config`] - Lock, retry and paging configuration
//! - [`core`] - Ledger components:
//!   - [`core::account_number`] - Unique `YYYYMMDDNNNNNXXX` account numbers
//!   - [`core::engine`] - Transfer engine with ordered locks and retries
//!   - [`core::balance`] - Balance reads and replay checks
//!   - [`core::history`] - Paged transaction history
//!   - [`core::store`] - Memory and SQLite store backends
//!   - [`core::ledger`] - Facade tying the components together
//! - [`directory`] - In-memory customer registry
//! - [`session`] - Applies labelled script operations to a ledger
//! - [`io`] - CSV script reading and balance output
//! - [`strategy`] - Sync and async script drivers
//! - [`cli`] - CLI arguments parsing
//!
//! # Money flow
//!
//! Deposits and withdrawals are balanced against the clearing account
//! ([`types::CLEARING_ACCOUNT`]), so the sum of every balance in the ledger,
//! clearing included, is always zero.

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod directory;
pub mod io;
pub mod session;
pub mod strategy;
pub mod types;

pub use config::LedgerConfig;
pub use core::{
    AccountNumber, AccountNumberGenerator, AuditReport, CustomerDirectory, HistoryOrder,
    HistoryPage, HistoryQuery, Ledger, LedgerStore, MemoryLedgerStore, Pagination,
    SqliteLedgerStore, TransferEngine,
};
pub use directory::CustomerRegistry;
pub use io::write_summaries_csv;
pub use session::{AccountSummary, LedgerSession, SessionError};
pub use types::{
    Account, AccountId, Customer, CustomerId, Entry, EntryType, LedgerError, Money, Transaction,
    TransactionId, TransactionType, CLEARING_ACCOUNT,
};

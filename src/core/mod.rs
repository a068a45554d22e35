//! Core business logic module
//!
//! This module contains the ledger core:
//! - `traits` - Store, unit-of-work and customer-directory abstractions
//! - `store` - Memory and SQLite store backends
//! - `engine` - Transfer state machine (transfers, deposits, withdrawals)
//! - `balance` - Committed balance reads and replay checks
//! - `history` - Paginated transaction history
//! - `account_number` - Account number composition and parsing
//! - `clock` / `random` - Injected time and randomness
//! - `ledger` - Facade tying the pieces together

pub mod account_number;
pub mod balance;
pub mod clock;
pub mod engine;
pub mod history;
pub mod ledger;
pub mod random;
pub mod store;
pub mod traits;

pub use account_number::{AccountNumber, AccountNumberGenerator};
pub use balance::BalanceAccessor;
pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{TransferEngine, TransferState, DEFAULT_TRANSFER_DESCRIPTION};
pub use history::{HistoryOrder, HistoryPage, HistoryQuery, HistoryReader, Pagination};
pub use ledger::Ledger;
pub use random::{RandomSource, ScriptedRandom, SeededRandom, ThreadRandom};
pub use store::{MemoryLedgerStore, SqliteLedgerStore};
pub use traits::{AuditReport, CustomerDirectory, LedgerStore, LedgerUnit};

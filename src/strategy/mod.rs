//! Processing strategy module for ledger scripts
//!
//! This module defines the Strategy pattern for complete script runs, covering
//! CSV parsing, applying operations to a ledger session and writing the final
//! balances. Different drivers (synchronous, asynchronous batch) and store
//! backends (memory, SQLite) are selected at runtime.

use crate::cli::{StoreKind, StrategyType};
use crate::config::LedgerConfig;
use crate::core::clock::{Clock, FixedClock, SystemClock};
use crate::core::random::{RandomSource, SeededRandom, ThreadRandom};
use crate::core::store::{MemoryLedgerStore, SqliteLedgerStore};
use crate::core::traits::LedgerStore;
use crate::io::csv_format::write_summaries_csv;
use crate::session::LedgerSession;
use chrono::NaiveDate;
use std::io::Write;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod r#async;
pub mod batch;
pub mod sync;

pub use self::r#async::{AsyncProcessingStrategy, BatchConfig};
pub use batch::BatchProcessor;
pub use sync::SyncProcessingStrategy;

/// Settings shared by every strategy: which store to run against and how to
/// build the ledger's collaborators
#[derive(Clone, Debug, Default)]
pub struct RunConfig {
    /// Store backend
    pub store: StoreKind,

    /// Database file, required for the SQLite store
    pub database: Option<PathBuf>,

    pub ledger: LedgerConfig,

    /// Pins the clock to midnight UTC of this date
    pub date: Option<NaiveDate>,

    /// Seeds the account-number suffix generator
    pub seed: Option<u64>,
}

impl RunConfig {
    /// Clock for the run: pinned when a date was given, the wall clock otherwise
    pub fn clock(&self) -> Arc<dyn Clock> {
        match self.date {
            Some(date) => Arc::new(FixedClock::on(date)),
            None => Arc::new(SystemClock),
        }
    }

    /// Suffix source for the run: deterministic when a seed was given
    pub fn random(&self) -> Arc<dyn RandomSource> {
        match self.seed {
            Some(seed) => Arc::new(SeededRandom::new(seed)),
            None => Arc::new(ThreadRandom),
        }
    }

    /// Open a session over the configured store
    ///
    /// # Errors
    ///
    /// Returns an error message if the SQLite store has no database path or
    /// cannot be opened.
    pub(crate) fn open_session(&self) -> Result<StoreSession, String> {
        let clock = self.clock();
        let lock_timeout = self.ledger.lock_timeout;

        match self.store {
            StoreKind::Memory => {
                let store = MemoryLedgerStore::new(Arc::clone(&clock), lock_timeout);
                Ok(StoreSession::Memory(LedgerSession::new(
                    store,
                    clock,
                    self.random(),
                    self.ledger.clone(),
                )))
            }
            StoreKind::Sqlite => {
                let path = self
                    .database
                    .as_ref()
                    .ok_or_else(|| "--database is required with --store sqlite".to_string())?;
                let store = SqliteLedgerStore::open(path, Arc::clone(&clock), lock_timeout)
                    .map_err(|e| format!("Failed to open database '{}': {}", path.display(), e))?;
                Ok(StoreSession::Sqlite(LedgerSession::new(
                    store,
                    clock,
                    self.random(),
                    self.ledger.clone(),
                )))
            }
        }
    }
}

/// A session over one of the store backends
pub(crate) enum StoreSession {
    Memory(LedgerSession<MemoryLedgerStore>),
    Sqlite(LedgerSession<SqliteLedgerStore>),
}

/// Counts of operations applied and rejected during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub applied: usize,
    pub rejected: usize,
}

impl RunStats {
    /// Record the outcome of one operation
    pub fn record(&mut self, applied: bool) {
        if applied {
            self.applied += 1;
        } else {
            self.rejected += 1;
        }
    }
}

impl AddAssign for RunStats {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.rejected += other.rejected;
    }
}

/// Audit the session and write its account summaries
///
/// # Errors
///
/// Returns an error if the audit finds an inconsistency or the output cannot
/// be written.
pub(crate) fn finish_run<S: LedgerStore>(
    session: &LedgerSession<S>,
    stats: RunStats,
    output: &mut dyn Write,
) -> Result<(), String> {
    let report = session
        .audit()
        .map_err(|e| format!("Ledger audit failed: {}", e))?;

    tracing::info!(
        applied = stats.applied,
        rejected = stats.rejected,
        accounts = report.accounts,
        transactions = report.transactions,
        "run complete"
    );

    let summaries = session
        .account_summaries()
        .map_err(|e| format!("Failed to read balances: {}", e))?;
    write_summaries_csv(&summaries, output)
}

/// Processing strategy trait for complete script runs
///
/// Each strategy reads operations from a CSV script, applies them to a ledger
/// session and writes the final balances to output.
pub trait ProcessingStrategy: Send + Sync {
    /// Run the script at `input_path` and write balances to `output`
    ///
    /// # Arguments
    ///
    /// * `input_path` - Path to the input CSV script
    /// * `output` - Mutable reference to a writer for the balance CSV
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the run completed (rejected operations included)
    /// * `Err(String)` if a fatal error occurred
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The input file cannot be opened
    /// - The store cannot be opened
    /// - The ledger audit fails after the run
    /// - Output cannot be written
    ///
    /// Malformed rows and rejected operations are logged and skipped.
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), String>;
}

/// Create a processing strategy based on the specified strategy type
///
/// # Arguments
///
/// * `strategy_type` - The type of processing strategy to create (Sync or Async)
/// * `batch` - Optional configuration for async batch processing (ignored for sync)
/// * `run` - Store and collaborator settings
///
/// # Returns
///
/// A boxed trait object implementing the ProcessingStrategy trait
pub fn create_strategy(
    strategy_type: StrategyType,
    batch: Option<BatchConfig>,
    run: RunConfig,
) -> Box<dyn ProcessingStrategy> {
    match strategy_type {
        StrategyType::Sync => Box::new(SyncProcessingStrategy::new(run)),
        StrategyType::Async => {
            let batch = batch.unwrap_or_default();
            Box::new(AsyncProcessingStrategy::new(batch, run))
        }
    }
}

//! Synchronous processing strategy
//!
//! Streams the script with `SyncReader` and applies each operation to the
//! session in file order on the calling thread.
//!
//! # Design
//!
//! The SyncProcessingStrategy focuses on orchestration, delegating:
//! - CSV parsing to `SyncReader` (iterator interface)
//! - Operation handling to `LedgerSession`
//! - CSV output to `csv_format::write_summaries_csv`
//!
//! Memory use is O(accounts + committed transactions) for the memory store and
//! O(accounts) for SQLite; the script itself is never held in memory.

use crate::core::traits::LedgerStore;
use crate::io::sync_reader::SyncReader;
use crate::session::LedgerSession;
use crate::strategy::{finish_run, ProcessingStrategy, RunConfig, RunStats, StoreSession};
use std::io::Write;
use std::path::Path;

/// Synchronous processing strategy
///
/// # Examples
///
/// ```no_run
/// use double_entry_ledger::strategy::{ProcessingStrategy, RunConfig, SyncProcessingStrategy};
/// use std::path::Path;
/// use std::io;
///
/// let strategy = SyncProcessingStrategy::new(RunConfig::default());
/// let mut output = io::stdout();
///
/// strategy.process(Path::new("script.csv"), &mut output)
///     .expect("Processing failed");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SyncProcessingStrategy {
    run: RunConfig,
}

impl SyncProcessingStrategy {
    pub fn new(run: RunConfig) -> Self {
        Self { run }
    }

    /// Apply every operation in `reader` to `session`
    fn apply_all<S: LedgerStore>(session: &LedgerSession<S>, reader: SyncReader) -> RunStats {
        let mut stats = RunStats::default();

        for result in reader {
            match result {
                Ok(operation) => stats.record(session.apply_logged(&operation)),
                Err(e) => tracing::warn!(error = %e, "skipping record"),
            }
        }

        stats
    }
}

impl ProcessingStrategy for SyncProcessingStrategy {
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), String> {
        // Open the script before the store so a bad path leaves no database behind
        let reader = SyncReader::new(input_path)?;

        match self.run.open_session()? {
            StoreSession::Memory(session) => {
                let stats = Self::apply_all(&session, reader);
                finish_run(&session, stats, output)
            }
            StoreSession::Sqlite(session) => {
                let stats = Self::apply_all(&session, reader);
                finish_run(&session, stats, output)
            }
        }
    }
}

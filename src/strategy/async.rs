//! Asynchronous batch processing strategy
//!
//! This module provides an asynchronous, multi-threaded implementation of the
//! ProcessingStrategy trait. It reads the script in batches and applies each
//! batch with label-based partitioning.
//!
//! # Architecture
//!
//! ```text
//! AsyncProcessingStrategy
//!     ├── BatchConfig (batch_size, max_concurrent_groups)
//!     ├── AsyncReader (batch CSV reading)
//!     └── BatchProcessor (label partitioning + blocking workers)
//!         └── Arc<LedgerSession> (shared ledger, memory or SQLite store)
//! ```
//!
//! # Ordering
//!
//! - Batches are processed sequentially, so operations that share a label
//!   stay in file order across batch boundaries
//! - Within a batch, independent groups run concurrently on tokio's blocking
//!   pool; ledger calls block on account locks and SQLite I/O, so they never
//!   run on the async worker threads

use crate::core::traits::LedgerStore;
use crate::io::async_reader::AsyncReader;
use crate::session::LedgerSession;
use crate::strategy::batch::BatchProcessor;
use crate::strategy::{finish_run, ProcessingStrategy, RunConfig, RunStats, StoreSession};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Configuration for batch processing
///
/// Controls how many operations are read per batch and how many independent
/// groups of a batch are applied at the same time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Number of operations per batch
    pub batch_size: usize,
    /// Maximum number of groups applied concurrently
    pub max_concurrent_groups: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent_groups: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    /// Create a new BatchConfig, replacing zero values with defaults
    pub fn new(batch_size: usize, max_concurrent_groups: usize) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            tracing::warn!(
                default = default.batch_size,
                "Invalid batch_size (0), using default"
            );
            default.batch_size
        } else {
            batch_size
        };

        let max_concurrent_groups = if max_concurrent_groups == 0 {
            tracing::warn!(
                default = default.max_concurrent_groups,
                "Invalid max_concurrent_groups (0), using default"
            );
            default.max_concurrent_groups
        } else {
            max_concurrent_groups
        };

        Self {
            batch_size,
            max_concurrent_groups,
        }
    }
}

/// Asynchronous batch processing strategy
///
/// Produces the same balances as [`SyncProcessingStrategy`](super::SyncProcessingStrategy)
/// for the same script; account ids and numbers may be assigned in a
/// different order.
#[derive(Debug, Clone)]
pub struct AsyncProcessingStrategy {
    config: BatchConfig,
    run: RunConfig,
}

impl AsyncProcessingStrategy {
    /// Create a new AsyncProcessingStrategy
    ///
    /// # Arguments
    ///
    /// * `config` - BatchConfig with batch_size and max_concurrent_groups
    /// * `run` - Store and collaborator settings
    pub fn new(config: BatchConfig, run: RunConfig) -> Self {
        Self { config, run }
    }

    /// Read `input_path` batch by batch and apply it to `session`
    async fn apply_all<S: LedgerStore + 'static>(
        &self,
        session: Arc<LedgerSession<S>>,
        input_path: &Path,
    ) -> Result<RunStats, String> {
        let file = tokio::fs::File::open(input_path)
            .await
            .map_err(|e| format!("Failed to open file '{}': {}", input_path.display(), e))?;

        // csv-async reads futures::io, tokio files implement tokio::io
        let compat_file = tokio_util::compat::TokioAsyncReadCompatExt::compat(file);
        let mut reader = AsyncReader::new(compat_file);

        let processor = BatchProcessor::new(session, self.config.max_concurrent_groups);
        let mut stats = RunStats::default();

        loop {
            let batch = reader.read_batch(self.config.batch_size).await;
            if batch.is_empty() {
                break;
            }
            stats += processor.process_batch(batch).await;
        }

        Ok(stats)
    }

    async fn run_session<S: LedgerStore + 'static>(
        &self,
        session: LedgerSession<S>,
        input_path: &Path,
        output: &mut dyn Write,
    ) -> Result<(), String> {
        let session = Arc::new(session);
        let stats = self.apply_all(Arc::clone(&session), input_path).await?;
        finish_run(&session, stats, output)
    }
}

impl ProcessingStrategy for AsyncProcessingStrategy {
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), String> {
        // Check the script before opening the store so a bad path leaves no database behind
        if !input_path.is_file() {
            return Err(format!(
                "Failed to open file '{}': not a readable file",
                input_path.display()
            ));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.max_concurrent_groups)
            .max_blocking_threads(self.config.max_concurrent_groups)
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

        let session = self.run.open_session()?;

        runtime.block_on(async {
            match session {
                StoreSession::Memory(session) => self.run_session(session, input_path, output).await,
                StoreSession::Sqlite(session) => self.run_session(session, input_path, output).await,
            }
        })
    }
}

use crate::config::LedgerConfig;
use crate::strategy::{BatchConfig, RunConfig};
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Replay a ledger script and print final account balances
#[derive(Parser, Debug)]
#[command(name = "ledger")]
#[command(about = "Replay a double-entry ledger script and print final balances", long_about = None)]
pub struct CliArgs {
    /// Input CSV file path containing script operations
    #[arg(value_name = "INPUT", help = "Path to the input CSV script")]
    pub input_file: PathBuf,

    /// Processing strategy to use for the script
    #[arg(
        long = "strategy",
        value_name = "STRATEGY",
        default_value = "async",
        help = "Processing strategy: 'sync' for sequential or 'async' for partitioned batches"
    )]
    pub strategy: StrategyType,

    /// Number of operations per batch (async mode only)
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of operations per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Maximum number of groups applied concurrently (async mode only)
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Maximum number of independent groups applied concurrently (default: CPU cores)"
    )]
    pub max_concurrent_groups: Option<usize>,

    /// Store backend
    #[arg(
        long = "store",
        value_name = "STORE",
        default_value = "memory",
        help = "Store backend: 'memory' or 'sqlite'"
    )]
    pub store: StoreKind,

    /// SQLite database file
    #[arg(
        long = "database",
        value_name = "PATH",
        required_if_eq("store", "sqlite"),
        help = "SQLite database file (required with --store sqlite)"
    )]
    pub database: Option<PathBuf>,

    /// Lock-wait timeout in milliseconds
    #[arg(
        long = "lock-timeout-ms",
        value_name = "MS",
        help = "Maximum wait for an account lock in milliseconds (default: 5000)"
    )]
    pub lock_timeout_ms: Option<u64>,

    /// Pin the ledger date
    #[arg(
        long = "date",
        value_name = "YYYY-MM-DD",
        help = "Date used in account numbers and timestamps (default: today, UTC)"
    )]
    pub date: Option<NaiveDate>,

    /// Seed for account-number suffixes
    #[arg(
        long = "seed",
        value_name = "N",
        help = "Seed for account-number suffixes (default: random)"
    )]
    pub seed: Option<u64>,
}

/// Available processing strategies
#[derive(Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum StrategyType {
    Sync,
    Async,
}

/// Available store backends
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum StoreKind {
    #[default]
    Memory,
    Sqlite,
}

impl CliArgs {
    /// Create a BatchConfig from CLI arguments
    ///
    /// Missing values fall back to the defaults; zero values are replaced by
    /// `BatchConfig::new` with a warning.
    pub fn to_batch_config(&self) -> BatchConfig {
        if self.batch_size.is_some() || self.max_concurrent_groups.is_some() {
            let default = BatchConfig::default();
            BatchConfig::new(
                self.batch_size.unwrap_or(default.batch_size),
                self.max_concurrent_groups
                    .unwrap_or(default.max_concurrent_groups),
            )
        } else {
            BatchConfig::default()
        }
    }

    /// Create a LedgerConfig from CLI arguments
    pub fn to_ledger_config(&self) -> LedgerConfig {
        match self.lock_timeout_ms {
            Some(ms) => {
                let default = LedgerConfig::default();
                LedgerConfig::new(
                    Duration::from_millis(ms),
                    default.lock_retries,
                    default.account_number_attempts,
                    default.default_page_size,
                )
            }
            None => LedgerConfig::default(),
        }
    }

    /// Create the store and collaborator settings from CLI arguments
    pub fn to_run_config(&self) -> RunConfig {
        RunConfig {
            store: self.store,
            database: self.database.clone(),
            ledger: self.to_ledger_config(),
            date: self.date,
            seed: self.seed,
        }
    }
}

//! Double-entry ledger CLI
//!
//! Replays a CSV script of ledger operations and prints the final balances.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- script.csv > balances.csv
//! cargo run -- --strategy sync script.csv > balances.csv
//! cargo run -- --strategy async --batch-size 2000 --max-concurrent 8 script.csv > balances.csv
//! cargo run -- --store sqlite --database ledger.db --date 2024-03-09 --seed 7 script.csv
//! RUST_LOG=debug cargo run -- script.csv
//! ```
//!
//! Logs go to stderr (default level `warn`, overridable with `RUST_LOG`), so
//! stdout carries only the balance CSV.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (file not readable, store failure, failed audit, etc.)

use double_entry_ledger::cli;
use double_entry_ledger::strategy;
use std::process;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn main() {
    init_tracing();

    let args = cli::parse_args();

    let strategy = {
        let batch = if matches!(args.strategy, cli::StrategyType::Async) {
            Some(args.to_batch_config())
        } else {
            None
        };
        strategy::create_strategy(args.strategy.clone(), batch, args.to_run_config())
    };

    let mut output = std::io::stdout();
    if let Err(e) = strategy.process(&args.input_file, &mut output) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

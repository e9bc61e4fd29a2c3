//! Event Card Ledger CLI
//!
//! Command-line interface for processing prepaid card commands from CSV files.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- commands.csv > cards.csv
//! cargo run -- --strategy sync --journal ledger.csv commands.csv > cards.csv
//! cargo run -- --report sales --from 2025-03-01 --to 2025-03-31 commands.csv > sales.csv
//! cargo run -- --report history --card TARJ-000001 commands.csv > history.csv
//! ```
//!
//! The program reads commands from the input CSV file, executes them against the
//! ledger using the selected processing strategy, and writes the requested report
//! to stdout. Logs go to stderr.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (file not found, damaged journal, bad report options, etc.)

use event_card_ledger::cli;
use event_card_ledger::observability;
use event_card_ledger::strategy;
use std::process;
use tracing::error;

fn main() {
    let args = cli::parse_args();
    observability::init(matches!(args.log_format, cli::LogFormat::Json));

    let run_config = match args.to_run_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid options");
            process::exit(1);
        }
    };

    let strategy = {
        let batch_config = if matches!(args.strategy, cli::StrategyType::Async) {
            Some(args.to_batch_config())
        } else {
            None
        };
        strategy::create_strategy(args.strategy.clone(), batch_config, run_config)
    };

    let mut output = std::io::stdout();
    if let Err(e) = strategy.process(&args.input_file, &mut output) {
        error!(error = %e, "Processing failed");
        process::exit(1);
    }
}

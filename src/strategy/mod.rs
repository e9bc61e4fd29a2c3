//! Processing strategy module for ledger command files
//!
//! This module defines the Strategy pattern for complete processing pipelines,
//! encompassing CSV parsing, ledger execution and report output. Different
//! implementations (synchronous, asynchronous batch) are selected at runtime.
//!
//! Both strategies share the same run setup: the journal is opened and replayed,
//! the point-of-sale catalog is loaded, and after the input is processed the
//! requested report is written to the output.

use crate::cli::StrategyType;
use crate::core::{
    CsvJournal, DateRange, InMemoryJournal, Journal, LedgerConfig, LedgerEngine,
    PointOfSaleDirectory, SystemClock,
};
use crate::io::csv_format::{
    read_points_of_sale, write_cards_csv, write_history_csv, write_sales_summary_csv,
    write_transactions_csv,
};
use crate::types::{CommandOutcome, LedgerCommand, LedgerError, PosId, TransactionKind};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod r#async;
pub mod sync;

pub use self::r#async::{AsyncProcessingStrategy, BatchConfig};
pub use sync::SyncProcessingStrategy;

/// Processing strategy trait for complete ledger pipelines
///
/// Each strategy reads ledger commands from a CSV file, executes them against
/// a ledger engine, and writes the requested report to the output.
pub trait ProcessingStrategy: Send + Sync {
    /// Process commands from input file and write the report to output
    ///
    /// # Arguments
    ///
    /// * `input_path` - Path to the input CSV file containing ledger commands
    /// * `output` - Writer receiving the report CSV
    ///
    /// # Returns
    ///
    /// * `Ok(())` if processing completed (rejected commands included)
    /// * `Err(String)` if a fatal error occurred
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The input file cannot be opened
    /// - The journal cannot be opened or does not replay cleanly
    /// - The point-of-sale catalog cannot be read
    /// - The report cannot be produced or written
    ///
    /// Commands the ledger rejects are logged and do not stop processing.
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), String>;
}

/// Which report a run writes once its input is processed
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ReportRequest {
    /// Every card with its owner, balance and status
    #[default]
    Balances,
    /// Payment totals per point of sale and top items
    Sales {
        range: DateRange,
        pos: Option<PosId>,
    },
    /// Audited list of transactions
    Transactions {
        range: DateRange,
        kind: Option<TransactionKind>,
        pos: Option<PosId>,
    },
    /// History of one card, newest first
    History { card: String },
}

/// Settings shared by every strategy
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub ledger: LedgerConfig,

    /// Durable journal; `None` keeps the run in memory
    pub journal_path: Option<PathBuf>,

    /// Flush the journal to disk after every append
    pub journal_sync: bool,

    /// Catalog file (`id,name,category,active`); `None` seeds the default outlets
    pub points_of_sale_path: Option<PathBuf>,

    pub report: ReportRequest,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            journal_path: None,
            journal_sync: true,
            points_of_sale_path: None,
            report: ReportRequest::default(),
        }
    }
}

/// Build the engine for a run: load the catalog, open the journal and replay it
pub(crate) async fn open_engine(config: &RunConfig) -> Result<LedgerEngine, String> {
    let points_of_sale = match &config.points_of_sale_path {
        Some(path) => {
            let directory = PointOfSaleDirectory::new();
            for pos in read_points_of_sale(path)? {
                directory.register(pos).map_err(|e| e.to_string())?;
            }
            directory
        }
        None => PointOfSaleDirectory::with_defaults(),
    };

    let (journal, entries) = match &config.journal_path {
        Some(path) => {
            let (journal, entries) =
                CsvJournal::open(path, config.journal_sync).map_err(|e| e.to_string())?;
            (Arc::new(journal) as Arc<dyn Journal>, entries)
        }
        None => (
            Arc::new(InMemoryJournal::new()) as Arc<dyn Journal>,
            Vec::new(),
        ),
    };

    let engine = LedgerEngine::with_parts(
        config.ledger.clone(),
        journal,
        Arc::new(SystemClock),
        points_of_sale,
    );

    if !entries.is_empty() {
        engine.replay(&entries).await.map_err(|e| e.to_string())?;
    }

    Ok(engine)
}

/// Log the outcome of one command
pub(crate) fn log_outcome(command: &LedgerCommand, result: &Result<CommandOutcome, LedgerError>) {
    match result {
        Ok(outcome) => debug!(op = command.op(), ?outcome, "Command applied"),
        Err(e) => warn!(
            op = command.op(),
            kind = e.kind().as_str(),
            retryable = e.is_retryable(),
            error = %e,
            "Command rejected"
        ),
    }
}

/// Write the requested report for `engine` to `output`
pub(crate) async fn write_report(
    engine: &LedgerEngine,
    report: &ReportRequest,
    output: &mut dyn Write,
) -> Result<(), String> {
    match report {
        ReportRequest::Balances => {
            let cards = engine.registry().cards().await.map_err(|e| e.to_string())?;
            write_cards_csv(&cards, output)
        }
        ReportRequest::Sales { range, pos } => {
            let summary = engine.reports().sales_summary(range, *pos);
            write_sales_summary_csv(&summary, output)
        }
        ReportRequest::Transactions { range, kind, pos } => {
            let report = engine.reports().transactions_report(range, *kind, *pos);
            info!(
                top_ups = report.top_up_count,
                top_up_total = %report.top_up_total,
                payments = report.payment_count,
                payment_total = %report.payment_total,
                net = %report.net,
                "Transactions report"
            );
            write_transactions_csv(&report, output)
        }
        ReportRequest::History { card } => {
            let history = engine.get_history(card).await.map_err(|e| e.to_string())?;
            write_history_csv(&history, output)
        }
    }
}

/// Create a processing strategy based on the specified strategy type
///
/// # Arguments
///
/// * `strategy_type` - The type of processing strategy to create (Sync or Async)
/// * `batch_config` - Batch settings for the async strategy (ignored for sync)
/// * `run_config` - Journal, catalog and report settings
///
/// # Returns
///
/// A boxed trait object implementing the ProcessingStrategy trait
pub fn create_strategy(
    strategy_type: StrategyType,
    batch_config: Option<BatchConfig>,
    run_config: RunConfig,
) -> Box<dyn ProcessingStrategy> {
    match strategy_type {
        StrategyType::Sync => Box::new(SyncProcessingStrategy::new(run_config)),
        StrategyType::Async => {
            let batch_config = batch_config.unwrap_or_default();
            Box::new(AsyncProcessingStrategy::new(batch_config, run_config))
        }
    }
}

use crate::core::{DateRange, LedgerConfig};
use crate::strategy::{BatchConfig, ReportRequest, RunConfig};
use crate::types::{PosId, TransactionKind};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Process prepaid event card commands
#[derive(Parser, Debug)]
#[command(name = "event-card-ledger")]
#[command(about = "Process prepaid event card commands and report balances", long_about = None)]
pub struct CliArgs {
    /// Input CSV file path containing ledger commands
    #[arg(value_name = "INPUT", help = "Path to the input CSV file")]
    pub input_file: PathBuf,

    /// Processing strategy
    #[arg(
        long = "strategy",
        value_name = "STRATEGY",
        default_value = "async",
        env = "CARD_LEDGER_STRATEGY",
        help = "Processing strategy: 'sync' for file order or 'async' for card-partitioned batches"
    )]
    pub strategy: StrategyType,

    /// Number of commands per batch (async mode only)
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        env = "CARD_LEDGER_BATCH_SIZE",
        help = "Number of commands per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Number of worker threads (async mode only)
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        env = "CARD_LEDGER_MAX_CONCURRENT",
        help = "Number of worker threads (default: CPU cores)"
    )]
    pub max_concurrent_batches: Option<usize>,

    /// Journal file; state is replayed from it on start and every change appended
    #[arg(long = "journal", value_name = "PATH", env = "CARD_LEDGER_JOURNAL")]
    pub journal: Option<PathBuf>,

    /// Skip the fsync after each journal append
    #[arg(long = "no-sync", env = "CARD_LEDGER_NO_SYNC")]
    pub no_sync: bool,

    /// How long a command waits for a busy card before failing as retryable
    #[arg(
        long = "lock-timeout-ms",
        value_name = "MILLIS",
        default_value_t = 2000,
        env = "CARD_LEDGER_LOCK_TIMEOUT_MS"
    )]
    pub lock_timeout_ms: u64,

    /// Seed for generated card numbers, for reproducible runs
    #[arg(long = "seed", value_name = "SEED", env = "CARD_LEDGER_SEED")]
    pub seed: Option<u64>,

    /// Points-of-sale catalog (id,name,category,active); defaults to the built-in outlets
    #[arg(
        long = "points-of-sale",
        value_name = "PATH",
        env = "CARD_LEDGER_POINTS_OF_SALE"
    )]
    pub points_of_sale: Option<PathBuf>,

    /// Report written to stdout after processing
    #[arg(
        long = "report",
        value_name = "REPORT",
        default_value = "balances",
        env = "CARD_LEDGER_REPORT"
    )]
    pub report: ReportType,

    /// First day (YYYY-MM-DD, UTC) included in the sales and transactions reports
    #[arg(long = "from", value_name = "DATE")]
    pub from: Option<String>,

    /// Last day (YYYY-MM-DD, UTC) included in the sales and transactions reports
    #[arg(long = "to", value_name = "DATE")]
    pub to: Option<String>,

    /// Only this kind of transaction in the transactions report
    #[arg(long = "kind", value_name = "KIND")]
    pub kind: Option<TransactionKind>,

    /// Only this point of sale in the sales and transactions reports
    #[arg(long = "pos", value_name = "ID")]
    pub pos: Option<PosId>,

    /// Card whose history is reported
    #[arg(long = "card", value_name = "CARD", required_if_eq("report", "history"))]
    pub card: Option<String>,

    /// Log line format on stderr
    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        default_value = "text",
        env = "CARD_LEDGER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,
}

/// Available processing strategies
#[derive(Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyType {
    Sync,
    Async,
}

/// Available reports
#[derive(Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportType {
    Balances,
    Sales,
    Transactions,
    History,
}

#[derive(Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl CliArgs {
    /// Create a BatchConfig from CLI arguments
    ///
    /// Missing values fall back to the defaults; zero values are replaced with a
    /// warning.
    pub fn to_batch_config(&self) -> BatchConfig {
        if self.batch_size.is_some() || self.max_concurrent_batches.is_some() {
            let default = BatchConfig::default();
            BatchConfig::new(
                self.batch_size.unwrap_or(default.batch_size),
                self.max_concurrent_batches
                    .unwrap_or(default.max_concurrent_batches),
            )
        } else {
            BatchConfig::default()
        }
    }

    /// Create the run settings from CLI arguments
    ///
    /// # Errors
    ///
    /// Returns an error if a date is malformed or `--from` is after `--to`.
    pub fn to_run_config(&self) -> Result<RunConfig, String> {
        let mut ledger =
            LedgerConfig::default().with_lock_timeout(Duration::from_millis(self.lock_timeout_ms));
        if let Some(seed) = self.seed {
            ledger = ledger.with_seed(seed);
        }

        let range = || DateRange::parse(self.from.as_deref(), self.to.as_deref());
        let report = match self.report {
            ReportType::Balances => ReportRequest::Balances,
            ReportType::Sales => ReportRequest::Sales {
                range: range().map_err(|e| e.to_string())?,
                pos: self.pos,
            },
            ReportType::Transactions => ReportRequest::Transactions {
                range: range().map_err(|e| e.to_string())?,
                kind: self.kind,
                pos: self.pos,
            },
            ReportType::History => ReportRequest::History {
                card: self.card.clone().unwrap_or_default(),
            },
        };

        Ok(RunConfig {
            ledger,
            journal_path: self.journal.clone(),
            journal_sync: !self.no_sync,
            points_of_sale_path: self.points_of_sale.clone(),
            report,
        })
    }
}

//! Synchronous processing strategy
//!
//! Executes ledger commands one at a time, in file order, on a single-threaded
//! runtime. Orchestrates:
//! - CSV parsing via `SyncReader` (iterator interface)
//! - Command execution via `LedgerEngine`
//! - Report output via the `csv_format` writers
//!
//! Records are streamed, so memory use is O(cards + transactions), independent
//! of how the input is laid out.

use crate::io::sync_reader::SyncReader;
use crate::strategy::{log_outcome, open_engine, write_report, ProcessingStrategy, RunConfig};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Synchronous processing strategy
///
/// # Examples
///
/// ```no_run
/// use event_card_ledger::strategy::{ProcessingStrategy, RunConfig, SyncProcessingStrategy};
/// use std::path::Path;
/// use std::io;
///
/// let strategy = SyncProcessingStrategy::new(RunConfig::default());
/// let mut output = io::stdout();
///
/// strategy.process(Path::new("commands.csv"), &mut output)
///     .expect("Processing failed");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SyncProcessingStrategy {
    config: RunConfig,
}

impl SyncProcessingStrategy {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }
}

impl ProcessingStrategy for SyncProcessingStrategy {
    /// Process commands in file order and write the report
    ///
    /// Fatal errors (file not found, journal damage, I/O errors) are returned
    /// immediately. Invalid records and rejected commands are logged and
    /// processing continues.
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), String> {
        let reader = SyncReader::new(input_path)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

        runtime.block_on(async {
            let engine = open_engine(&self.config).await?;

            let mut processed = 0usize;
            for result in reader {
                match result {
                    Ok(command) => {
                        let result = engine.execute(command.clone()).await;
                        log_outcome(&command, &result);
                        processed += 1;
                    }
                    Err(e) => warn!(error = %e, "Skipping invalid record"),
                }
            }
            info!(commands = processed, "Input processed");

            write_report(&engine, &self.config.report, output).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DateRange;
    use crate::strategy::ReportRequest;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    /// Helper function to create a temporary CSV file for testing
    fn create_temp_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    fn run(strategy: &SyncProcessingStrategy, input: &str) -> Result<String, String> {
        let file = create_temp_csv(input);
        let mut output = Vec::new();
        strategy.process(file.path(), &mut output)?;
        Ok(String::from_utf8(output).unwrap())
    }

    const LIFECYCLE: &str = "op,card,owner,pos,amount,text\n\
        owner,,1,,,Ana\n\
        assign,TARJ-000001,1,,,\n\
        topup,TARJ-000001,,,50,\n\
        pay,TARJ-000001,,2,20,Coffee x2\n";

    #[test]
    fn test_sync_strategy_writes_balances() {
        let output = run(&SyncProcessingStrategy::default(), LIFECYCLE).unwrap();

        assert_eq!(
            output,
            "card,owner,balance,status\nTARJ-000001,1,30.00,ACTIVE\n"
        );
    }

    #[test]
    fn test_sync_strategy_handles_missing_file() {
        let strategy = SyncProcessingStrategy::default();
        let mut output = Vec::new();

        let result = strategy.process(Path::new("nonexistent.csv"), &mut output);
        assert!(result.unwrap_err().contains("Failed to open file"));
    }

    #[test]
    fn test_sync_strategy_continues_on_malformed_and_rejected_records() {
        let input = "op,card,owner,pos,amount,text\n\
            owner,,1,,,Ana\n\
            assign,TARJ-000001,1,,,\n\
            topup,TARJ-000001,,,ten,\n\
            pay,TARJ-000001,,1,5,\n\
            topup,TARJ-000001,,,8,\n";

        let output = run(&SyncProcessingStrategy::default(), input).unwrap();

        // The payment fails on insufficient funds, the bad amount is skipped
        assert_eq!(output, "card,owner,balance,status\nTARJ-000001,1,8.00,ACTIVE\n");
    }

    #[test]
    fn test_sync_strategy_writes_history_report() {
        let strategy = SyncProcessingStrategy::new(RunConfig {
            report: ReportRequest::History {
                card: "tarj-000001".to_string(),
            },
            ..RunConfig::default()
        });

        let output = run(&strategy, LIFECYCLE).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("2,"));
        assert!(lines[1].ends_with(",PAYMENT,20.00,50.00,30.00,2,Coffee x2"));
        assert!(lines[2].ends_with(",TOPUP,50.00,0.00,50.00,,Top-up of 50.00"));
    }

    #[test]
    fn test_sync_strategy_history_of_unknown_card_is_fatal() {
        let strategy = SyncProcessingStrategy::new(RunConfig {
            report: ReportRequest::History {
                card: "TARJ-999999".to_string(),
            },
            ..RunConfig::default()
        });

        assert!(run(&strategy, LIFECYCLE).is_err());
    }

    #[test]
    fn test_sync_strategy_writes_sales_report() {
        let strategy = SyncProcessingStrategy::new(RunConfig {
            report: ReportRequest::Sales {
                range: DateRange::all(),
                pos: None,
            },
            ..RunConfig::default()
        });

        let output = run(&strategy, LIFECYCLE).unwrap();

        assert_eq!(
            output,
            "group,key,name,count,total,average\n\
             all,,,1,20.00,20.00\n\
             point_of_sale,2,Cafeteria,1,20.00,20.00\n\
             item,,Coffee,2,20.00,10.00\n"
        );
    }

    #[test]
    fn test_sync_strategy_resumes_from_journal() {
        let dir = TempDir::new().unwrap();
        let strategy = SyncProcessingStrategy::new(RunConfig {
            journal_path: Some(dir.path().join("journal.csv")),
            journal_sync: false,
            ..RunConfig::default()
        });

        run(&strategy, LIFECYCLE).unwrap();
        let output = run(&strategy, "op,card,owner,pos,amount,text\ntopup,TARJ-000001,,,5,\n").unwrap();

        assert_eq!(output, "card,owner,balance,status\nTARJ-000001,1,35.00,ACTIVE\n");
    }

    #[test]
    fn test_sync_strategy_loads_points_of_sale_catalog() {
        let catalog = create_temp_csv("id,name,category\n7,Food Truck,food\n");
        let strategy = SyncProcessingStrategy::new(RunConfig {
            points_of_sale_path: Some(catalog.path().to_path_buf()),
            ..RunConfig::default()
        });
        let input = "op,card,owner,pos,amount,text\n\
            owner,,1,,,Ana\n\
            assign,TARJ-000001,1,,,\n\
            topup,TARJ-000001,,,50,\n\
            pay,TARJ-000001,,2,20,\n\
            pay,TARJ-000001,,7,15,\n";

        let output = run(&strategy, input).unwrap();

        // Outlet 2 is not in the loaded catalog
        assert_eq!(output, "card,owner,balance,status\nTARJ-000001,1,35.00,ACTIVE\n");
    }

    #[test]
    fn test_sync_strategy_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncProcessingStrategy>();
    }
}

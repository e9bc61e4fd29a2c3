//! Synchronous CSV reader with iterator interface
//!
//! Provides a streaming iterator over ledger commands from a CSV file.
//! Delegates CSV format concerns to the csv_format module.
//!
//! # Iterator Interface
//!
//! SyncReader implements the Iterator trait, yielding Result<LedgerCommand, String>
//! for each CSV row:
//!
//! ```no_run
//! use event_card_ledger::io::sync_reader::SyncReader;
//! use std::path::Path;
//!
//! let reader = SyncReader::new(Path::new("commands.csv")).unwrap();
//! for result in reader {
//!     match result {
//!         Ok(command) => println!("Processing command: {:?}", command),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! - Fatal errors (file not found, I/O errors) are returned from `new()`
//! - Individual record parsing errors are yielded as Err variants in the iterator
//! - Line numbers are included in error messages for debugging

use crate::io::csv_format::{convert_command_record, CommandRecord};
use crate::types::LedgerCommand;
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::path::Path;

/// Synchronous CSV reader
///
/// Reads one record at a time, so memory use does not grow with the file.
#[derive(Debug)]
pub struct SyncReader {
    reader: csv::Reader<File>,
    line_num: usize,
}

impl SyncReader {
    /// Create a new SyncReader from a file path
    ///
    /// The CSV reader is configured to:
    /// - Trim whitespace from all fields
    /// - Allow flexible field counts (trailing empty columns may be omitted)
    /// - Use an 8KB buffer
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the CSV file
    ///
    /// # Returns
    ///
    /// * `Ok(SyncReader)` if file opened successfully
    /// * `Err(String)` if file could not be opened
    pub fn new(path: &Path) -> Result<Self, String> {
        let file = File::open(path)
            .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;

        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(file);

        Ok(Self {
            reader,
            line_num: 0,
        })
    }
}

impl Iterator for SyncReader {
    type Item = Result<LedgerCommand, String>;

    /// Get the next command from the CSV file
    ///
    /// # Returns
    ///
    /// * `Some(Ok(LedgerCommand))` - Successfully parsed command
    /// * `Some(Err(String))` - Parse or conversion error with line number
    /// * `None` - End of file reached
    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<CommandRecord>();
        let record = deserializer.next()?;

        // Line 1 is the header
        self.line_num += 1;
        let line = self.line_num + 1;

        Some(match record {
            Ok(record) => convert_command_record(record).map_err(|e| format!("Line {}: {}", line, e)),
            Err(e) => Err(format!("Line {}: CSV parse error: {}", line, e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper function to create a temporary CSV file for testing
    fn create_temp_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    #[test]
    fn test_sync_reader_new_fails_on_missing_file() {
        let result = SyncReader::new(Path::new("nonexistent.csv"));
        assert!(result.unwrap_err().contains("Failed to open file"));
    }

    #[test]
    fn test_sync_reader_iterates_all_operations() {
        let csv_content = "op,card,owner,pos,amount,text\n\
            owner,,1,,,Ana\n\
            assign,TARJ-000001,1,,,\n\
            topup,TARJ-000001,,,50.00,\n\
            pay,TARJ-000001,,2,20.00,Coffee x2\n";
        let file = create_temp_csv(csv_content);

        let commands: Vec<LedgerCommand> = SyncReader::new(file.path())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0].op(), "owner");
        assert_eq!(
            commands[3],
            LedgerCommand::Pay {
                card: "TARJ-000001".to_string(),
                amount: dec!(20.00),
                pos: 2,
                note: Some("Coffee x2".to_string()),
            }
        );
    }

    #[test]
    fn test_sync_reader_includes_line_numbers_and_continues_after_error() {
        let csv_content = "op,card,owner,pos,amount,text\n\
            topup,TARJ-000001,,,10,\n\
            topup,TARJ-000001,,,ten,\n\
            refund,TARJ-000001,,,1,\n\
            topup,TARJ-000001,,,5,\n";
        let file = create_temp_csv(csv_content);

        let records: Vec<_> = SyncReader::new(file.path()).unwrap().collect();

        assert_eq!(records.len(), 4);
        assert!(records[0].is_ok());
        let amount_error = records[1].as_ref().unwrap_err();
        assert!(amount_error.contains("Line 3"));
        assert!(amount_error.contains("Invalid amount"));
        assert!(records[2].as_ref().unwrap_err().contains("Line 4"));
        assert!(records[3].is_ok());
    }

    #[test]
    fn test_sync_reader_handles_whitespace_and_short_rows() {
        let csv_content = "op,card,owner,pos,amount,text\n  assign  ,  ,  3  \n";
        let file = create_temp_csv(csv_content);

        let records: Vec<_> = SyncReader::new(file.path()).unwrap().collect();

        assert_eq!(
            records,
            vec![Ok(LedgerCommand::Assign {
                owner: 3,
                card: None
            })]
        );
    }

    #[test]
    fn test_sync_reader_handles_empty_file_after_header() {
        let file = create_temp_csv("op,card,owner,pos,amount,text\n");

        let reader = SyncReader::new(file.path()).unwrap();
        assert_eq!(reader.count(), 0);
    }

    #[test]
    fn test_sync_reader_reads_owner_contact_columns() {
        let csv_content = "op,card,owner,pos,amount,text,email,phone\n\
            owner,,5,,,Bea,bea@example.com,\n";
        let file = create_temp_csv(csv_content);

        let records: Vec<_> = SyncReader::new(file.path()).unwrap().collect();

        assert_eq!(
            records,
            vec![Ok(LedgerCommand::RegisterOwner {
                owner: 5,
                name: "Bea".to_string(),
                email: Some("bea@example.com".to_string()),
                phone: None,
            })]
        );
    }
}

//! Core business logic module
//!
//! This module contains the ledger components:
//! - `traits` - Journal and clock abstractions
//! - `config` - Engine configuration
//! - `journal` - Durable journal (in-memory and CSV file)
//! - `card_registry` - Card identity, lifecycle and owner roster
//! - `ledger` - Balance mutations and the card state machine
//! - `transaction_log` - Append-only transaction history
//! - `point_of_sale` - Catalog of points of sale
//! - `report` - Read-only report views
//! - `batch_processor` - Concurrent batch execution partitioned by card

pub mod batch_processor;
pub mod card_registry;
pub mod config;
pub mod journal;
pub mod ledger;
pub mod point_of_sale;
pub mod report;
pub mod traits;
pub mod transaction_log;

pub use batch_processor::{BatchProcessor, ProcessingResult};
pub use card_registry::CardRegistry;
pub use config::{LedgerConfig, DEFAULT_LOCK_TIMEOUT};
pub use journal::{CsvJournal, InMemoryJournal, JournalEntry};
pub use ledger::LedgerEngine;
pub use point_of_sale::PointOfSaleDirectory;
pub use report::{
    DateRange, ItemSales, PaymentAudit, PosSales, ReportAggregator, ReportEntry, SalesSummary,
    TransactionsReport,
};
pub use traits::{Clock, FixedClock, Journal, SystemClock};
pub use transaction_log::TransactionLog;

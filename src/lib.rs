//! Event Card Ledger Library
//! # Overview
//!
//! Prepaid card ledger for events: owners receive cards, cards are topped up
//! and spent at points of sale, and every change is committed to a journal
//! before it becomes visible. Commands are read from CSV with either a sync or
//! an async strategy.
//!
//! # Architecture
//!
//! - [`types`] - Core data types (Card, Transaction, LedgerError, etc.)
//! - [`cli`] - CLI arguments parsing
//! - [`core`] - Business logic components:
//!   - [`core::card_registry`] - Card identity, assignment and owner roster
//!   - [`core::ledger`] - Balance mutations and the card state machine
//!   - [`core::transaction_log`] - Append-only transaction history
//!   - [`core::journal`] - Durable journal and crash recovery
//!   - [`core::report`] - Sales and transaction reports
//!   - [`core::batch_processor`] - Card-partitioned concurrent execution
//! - [`io`] - CSV input and report output
//! - [`strategy`] - Sync and async processing pipelines
//! - [`observability`] - Logging setup
//!
//! # Card Lifecycle
//!
//! - **Assign**: A registered owner receives a new card, or a BLOCKED card is
//!   handed out again with its balance reset to zero
//! - **Top up**: Credits the card; a BLOCKED card with a positive balance becomes ACTIVE
//! - **Pay**: Debits the card at a point of sale; reaching zero blocks the card
//!
//! # Guarantees
//!
//! - Balances never go negative and never exceed 99,999,999.99
//! - Mutations of one card are serialized; different cards proceed in parallel
//! - Each card's balance equals the replay of its transaction history

pub mod cli;
pub mod core;
pub mod io;
pub mod observability;
pub mod strategy;
pub mod types;

pub use core::{CardRegistry, LedgerConfig, LedgerEngine, TransactionLog};
pub use types::{
    Amount, Card, CardNumber, CardStatus, LedgerCommand, LedgerError, Owner, PointOfSale,
    Transaction, TransactionKind,
};

//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `card`: Cards, card numbers and owners
//! - `transaction`: Amounts, transaction kinds and committed transactions
//! - `point_of_sale`: Outlets referenced by payments
//! - `command`: Ledger commands and their outcomes
//! - `error`: Error types for the ledger

pub mod card;
pub mod command;
pub mod error;
pub mod point_of_sale;
pub mod transaction;

pub use card::{Card, CardId, CardNumber, CardStatus, CardVerification, Owner, OwnerId};
pub use command::{CommandOutcome, LedgerCommand, PaymentReceipt, TopUpReceipt};
pub use error::{Entity, ErrorKind, LedgerError};
pub use point_of_sale::{PointOfSale, PosId};
pub use transaction::{Amount, Transaction, TransactionId, TransactionKind, AMOUNT_SCALE};

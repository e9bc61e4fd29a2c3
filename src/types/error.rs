//! Error types for the card ledger
//!
//! Every failure the ledger can report is a variant of [`LedgerError`]. Each variant
//! maps to a machine-readable [`ErrorKind`] so callers can branch on the kind and
//! show the human message as-is.
//!
//! # Error Categories
//!
//! - **Input errors**: malformed amounts or card numbers (`Validation`)
//! - **Lookup errors**: unknown card, owner or point of sale (`NotFound`)
//! - **Assignment errors**: duplicate card bindings (`Conflict`)
//! - **Payment errors**: `InsufficientFunds`, `BlockedCard`
//! - **Storage errors**: `Retryable` (lock timeout, transient I/O) and `Persistence`

use crate::types::card::CardNumber;
use rust_decimal::Decimal;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Kind of entity a lookup failed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Card,
    Owner,
    PointOfSale,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Card => "Card",
            Entity::Owner => "Owner",
            Entity::PointOfSale => "Point of sale",
        };
        f.write_str(name)
    }
}

/// Machine-readable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InsufficientFunds,
    BlockedCard,
    Retryable,
    Persistence,
}

impl ErrorKind {
    /// Stable identifier for logs and external bindings
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::BlockedCard => "blocked_card",
            ErrorKind::Retryable => "retryable",
            ErrorKind::Persistence => "persistence_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the card ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Malformed input: bad amount, bad card number format, blank name, bad date range
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what was rejected
        message: String,
    },

    /// Unknown card, owner or point of sale
    #[error("{entity} {key} not found")]
    NotFound {
        /// Entity that was looked up
        entity: Entity,
        /// Key used for the lookup
        key: String,
    },

    /// Card or owner binding already exists
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflicting state
        message: String,
    },

    /// Payment amount exceeds the card balance
    ///
    /// The card is left untouched.
    #[error("Insufficient funds on card {card}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Card that was charged
        card: CardNumber,
        /// Balance at the time of the attempt
        balance: Decimal,
        /// Requested payment amount
        requested: Decimal,
    },

    /// Payment attempted on a BLOCKED card
    #[error("Card {card} is blocked; top it up to continue")]
    BlockedCard {
        /// The blocked card
        card: CardNumber,
    },

    /// Transient failure; the operation had no effect and may be retried
    #[error("Retryable error: {message}")]
    Retryable {
        /// Description of the transient condition
        message: String,
    },

    /// Non-retryable storage fault; the operation had no effect
    #[error("Persistence error: {message}")]
    Persistence {
        /// Description of the storage fault
        message: String,
    },
}

impl LedgerError {
    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation { .. } => ErrorKind::Validation,
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::Conflict { .. } => ErrorKind::Conflict,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::BlockedCard { .. } => ErrorKind::BlockedCard,
            LedgerError::Retryable { .. } => ErrorKind::Retryable,
            LedgerError::Persistence { .. } => ErrorKind::Persistence,
        }
    }

    /// Whether the caller may retry the same request safely
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    /// Create a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
        }
    }

    /// Create a NotFound error
    pub fn not_found(entity: Entity, key: impl fmt::Display) -> Self {
        LedgerError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Create a NotFound error for a card
    pub fn card_not_found(card: &CardNumber) -> Self {
        Self::not_found(Entity::Card, card)
    }

    /// Create a Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        LedgerError::Conflict {
            message: message.into(),
        }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(card: &CardNumber, balance: Decimal, requested: Decimal) -> Self {
        LedgerError::InsufficientFunds {
            card: card.clone(),
            balance,
            requested,
        }
    }

    /// Create a BlockedCard error
    pub fn blocked_card(card: &CardNumber) -> Self {
        LedgerError::BlockedCard { card: card.clone() }
    }

    /// Create a Retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        LedgerError::Retryable {
            message: message.into(),
        }
    }

    /// Create a Retryable error for a card lock that could not be acquired in time
    pub fn lock_timeout(card: &CardNumber, waited: Duration) -> Self {
        Self::retryable(format!(
            "card {} is busy; lock not acquired within {}ms",
            card,
            waited.as_millis()
        ))
    }

    /// Create a Persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        LedgerError::Persistence {
            message: message.into(),
        }
    }
}

// Interrupted writes can be retried as-is; anything else is a storage fault
impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        match error.kind() {
            IoKind::Interrupted | IoKind::WouldBlock | IoKind::TimedOut => {
                LedgerError::retryable(format!("I/O error: {}", error))
            }
            _ => LedgerError::persistence(format!("I/O error: {}", error)),
        }
    }
}

impl From<csv::Error> for LedgerError {
    fn from(error: csv::Error) -> Self {
        let line = error
            .position()
            .map(|pos| format!(" at line {}", pos.line()))
            .unwrap_or_default();
        LedgerError::persistence(format!("journal record error{}: {}", line, error))
    }
}

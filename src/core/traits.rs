//! Core traits for durable storage and time
//!
//! This module defines the trait abstractions that let the ledger run against a
//! file-backed journal in production and an in-memory one in tests, and against a
//! fixed clock when timestamps must be deterministic.

use crate::core::journal::JournalEntry;
use crate::types::LedgerError;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Durable append-only record of ledger events
///
/// `append` is the commit point of every mutation: the ledger changes in-memory
/// state only after it returns `Ok`. An implementation that returns an error must
/// leave no trace of the entry, so a later replay never sees it.
///
/// Appends for the same card are already serialized by the caller. Appends for
/// different cards may arrive concurrently, so implementations synchronize
/// internally.
pub trait Journal: Send + Sync + Debug {
    /// Durably record one entry
    ///
    /// # Errors
    ///
    /// * `LedgerError::Retryable` for transient faults (interrupted or timed-out I/O)
    /// * `LedgerError::Persistence` for anything else
    fn append(&self, entry: &JournalEntry) -> Result<(), LedgerError>;
}

/// Source of transaction and registration timestamps
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock in UTC
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

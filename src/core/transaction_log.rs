//! Append-only transaction history
//!
//! This module provides the [`TransactionLog`], the in-memory record of every
//! committed top-up and payment.
//!
//! # Design
//!
//! Transactions are grouped per card in a `DashMap`, so appends for different cards
//! touch different shards and proceed concurrently. Within one card the sequence is
//! in creation order: the ledger appends while holding that card's lock.
//!
//! # Ownership
//!
//! Only the ledger engine appends. Everything else sees the log through read-only
//! methods, and nothing is ever removed or changed once appended.

use crate::types::{CardNumber, Transaction, TransactionId};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe, append-only log of committed transactions
#[derive(Debug)]
pub struct TransactionLog {
    /// Transactions per card, oldest first
    by_card: DashMap<CardNumber, Vec<Transaction>>,

    /// Next identifier to hand out
    next_id: AtomicU64,
}

impl TransactionLog {
    /// Create an empty log whose first transaction gets id 1
    pub fn new() -> Self {
        Self {
            by_card: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserve the identifier of the next transaction
    ///
    /// Identifiers are unique and increasing. A mutation that fails after reserving
    /// one leaves a gap in the sequence.
    pub(crate) fn next_id(&self) -> TransactionId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Append a committed transaction
    ///
    /// # Arguments
    ///
    /// * `transaction` - Transaction already written to the journal
    ///
    /// # Returns
    ///
    /// The identifier of the appended transaction
    pub(crate) fn append(&self, transaction: Transaction) -> TransactionId {
        let id = transaction.id;
        self.by_card
            .entry(transaction.card_number.clone())
            .or_default()
            .push(transaction);
        id
    }

    /// Append a transaction read back from the journal
    ///
    /// Keeps the id counter ahead of every restored identifier.
    pub(crate) fn restore(&self, transaction: Transaction) {
        self.next_id
            .fetch_max(transaction.id.saturating_add(1), Ordering::SeqCst);
        self.append(transaction);
    }

    /// Transactions of one card, most recent first
    ///
    /// Unknown cards and cards without movements both yield an empty list.
    pub fn history(&self, card: &CardNumber) -> Vec<Transaction> {
        self.by_card
            .get(card)
            .map(|entries| entries.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Sum of signed amounts of one card, replayed in creation order from zero
    pub fn reconstruct_balance(&self, card: &CardNumber) -> Decimal {
        self.by_card
            .get(card)
            .map(|entries| {
                entries
                    .iter()
                    .fold(Decimal::ZERO, |balance, tx| balance + tx.signed_amount())
            })
            .unwrap_or(Decimal::ZERO)
    }

    /// Every transaction, in creation order
    pub fn all(&self) -> Vec<Transaction> {
        let mut all: Vec<Transaction> = self
            .by_card
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|tx| tx.id);
        all
    }

    pub fn len(&self) -> usize {
        self.by_card.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TransactionLog {
    fn default() -> Self {
        Self::new()
    }
}

//! Batch processing with card-based partitioning
//!
//! This module provides the `BatchProcessor` struct, which runs batches of ledger
//! commands concurrently while keeping every card's commands in input order.
//!
//! # Design
//!
//! A batch is cut into segments at every registry command (owner registration or
//! card assignment). Registry commands run alone, in input order, because they
//! read and change registry-wide state. The top-ups and payments between two of
//! them are partitioned by card number: each card's commands run sequentially in
//! one spawned task, and different cards run in parallel.
//!
//! ```text
//! [owner] [assign] [topup A, pay B, pay A] [assign] [pay A, pay C]
//!   seq     seq      A: topup, pay | B: pay   seq     A: pay | C: pay
//! ```
//!
//! # Thread Safety
//!
//! The processor is cloneable and can be moved into async tasks; clones share the
//! same [`LedgerEngine`].

use std::collections::HashMap;

use crate::core::ledger::LedgerEngine;
use crate::types::{CommandOutcome, LedgerCommand, LedgerError};
use tracing::error;

/// Result of processing a single command
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    /// The command that was processed
    pub command: LedgerCommand,

    /// The outcome, or why the ledger rejected the command
    pub result: Result<CommandOutcome, LedgerError>,
}

/// Stretch of a batch that runs under one scheduling rule
#[derive(Debug, PartialEq)]
enum Segment {
    /// A registry command, run alone
    Barrier(LedgerCommand),
    /// Balance mutations, run partitioned by card
    Partitioned(Vec<LedgerCommand>),
}

/// Batch processor with card-based partitioning
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    engine: LedgerEngine,
}

impl BatchProcessor {
    /// Create a new BatchProcessor
    ///
    /// # Arguments
    ///
    /// * `engine` - Ledger the commands are executed against
    pub fn new(engine: LedgerEngine) -> Self {
        Self { engine }
    }

    /// Cut a batch into barrier and partitioned segments, keeping input order
    fn segments(batch: Vec<LedgerCommand>) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut run = Vec::new();

        for command in batch {
            if command.partition_key().is_some() {
                run.push(command);
            } else {
                if !run.is_empty() {
                    segments.push(Segment::Partitioned(std::mem::take(&mut run)));
                }
                segments.push(Segment::Barrier(command));
            }
        }
        if !run.is_empty() {
            segments.push(Segment::Partitioned(run));
        }

        segments
    }

    /// Partition balance mutations by normalised card number
    ///
    /// # Guarantees
    ///
    /// - Each command appears in exactly one partition
    /// - Commands for each card keep their original order
    pub fn partition_by_card(
        &self,
        commands: Vec<LedgerCommand>,
    ) -> HashMap<String, Vec<LedgerCommand>> {
        let mut card_batches: HashMap<String, Vec<LedgerCommand>> = HashMap::new();

        for command in commands {
            let key = command.partition_key().unwrap_or_default();
            card_batches.entry(key).or_default().push(command);
        }

        card_batches
    }

    /// Run commands one after another, collecting every outcome
    ///
    /// A rejected command does not stop the ones after it.
    pub async fn process_sequentially(
        &self,
        commands: Vec<LedgerCommand>,
    ) -> Vec<ProcessingResult> {
        let mut results = Vec::with_capacity(commands.len());

        for command in commands {
            let result = self.engine.execute(command.clone()).await;
            results.push(ProcessingResult { command, result });
        }

        results
    }

    async fn process_partitioned(&self, commands: Vec<LedgerCommand>) -> Vec<ProcessingResult> {
        let card_batches = self.partition_by_card(commands);

        let mut tasks = Vec::with_capacity(card_batches.len());
        for (_card, commands) in card_batches {
            let processor = self.clone();
            tasks.push(tokio::spawn(async move {
                processor.process_sequentially(commands).await
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            match task.await {
                Ok(card_results) => results.extend(card_results),
                Err(e) => error!(error = %e, "Card task failed"),
            }
        }

        results
    }

    /// Process a batch of commands
    ///
    /// # Returns
    ///
    /// One `ProcessingResult` per command. Results of different cards may be
    /// interleaved differently from the input.
    ///
    /// # Guarantees
    ///
    /// - Registry commands run in input order, never concurrently with anything
    /// - Commands for the same card run sequentially in input order
    /// - Commands for different cards between two registry commands run concurrently
    pub async fn process_batch(&self, batch: Vec<LedgerCommand>) -> Vec<ProcessingResult> {
        let mut results = Vec::with_capacity(batch.len());

        for segment in Self::segments(batch) {
            match segment {
                Segment::Barrier(command) => {
                    results.extend(self.process_sequentially(vec![command]).await)
                }
                Segment::Partitioned(commands) => {
                    results.extend(self.process_partitioned(commands).await)
                }
            }
        }

        results
    }
}

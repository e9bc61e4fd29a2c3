//! Asynchronous batch processing strategy
//!
//! Reads ledger commands in batches and executes each batch with card-based
//! partitioning on a multi-threaded tokio runtime.
//!
//! # Architecture
//!
//! ```text
//! AsyncProcessingStrategy
//!     ├── BatchConfig (batch_size, max_concurrent_batches)
//!     ├── AsyncReader (batch CSV reading)
//!     ├── BatchProcessor (registry barriers + card partitioning)
//!     └── LedgerEngine (per-card locks, journal, DashMap-backed state)
//! ```
//!
//! # Ordering
//!
//! - Batches run one after another, so a card's commands keep file order across batches
//! - Within a batch, owner registrations and assignments run alone and in order
//! - Top-ups and payments for different cards run concurrently

use crate::core::BatchProcessor;
use crate::io::async_reader::AsyncReader;
use crate::strategy::{log_outcome, open_engine, write_report, ProcessingStrategy, RunConfig};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Configuration for batch processing
///
/// Controls how commands are batched and the number of worker threads
/// executing different cards in parallel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Number of commands per batch
    pub batch_size: usize,
    /// Number of runtime worker threads
    pub max_concurrent_batches: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent_batches: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    /// Create a new BatchConfig, replacing zero values with the defaults
    pub fn new(batch_size: usize, max_concurrent_batches: usize) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            warn!(
                batch_size,
                default = default.batch_size,
                "Invalid batch_size, using default"
            );
            default.batch_size
        } else {
            batch_size
        };

        let max_concurrent_batches = if max_concurrent_batches == 0 {
            warn!(
                max_concurrent_batches,
                default = default.max_concurrent_batches,
                "Invalid max_concurrent_batches, using default"
            );
            default.max_concurrent_batches
        } else {
            max_concurrent_batches
        };

        Self {
            batch_size,
            max_concurrent_batches,
        }
    }
}

/// Asynchronous batch processing strategy
#[derive(Debug, Clone, Default)]
pub struct AsyncProcessingStrategy {
    config: BatchConfig,
    run: RunConfig,
}

impl AsyncProcessingStrategy {
    /// Create a new AsyncProcessingStrategy
    ///
    /// # Arguments
    ///
    /// * `config` - BatchConfig with batch_size and max_concurrent_batches
    /// * `run` - Journal, catalog and report settings
    pub fn new(config: BatchConfig, run: RunConfig) -> Self {
        Self { config, run }
    }
}

impl ProcessingStrategy for AsyncProcessingStrategy {
    /// Process commands batch by batch and write the report
    ///
    /// Fatal errors (file not found, journal damage, runtime errors) are returned
    /// immediately. Invalid records and rejected commands are logged and
    /// processing continues.
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), String> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.max_concurrent_batches)
            .enable_all()
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

        runtime.block_on(async {
            let file = tokio::fs::File::open(input_path)
                .await
                .map_err(|e| format!("Failed to open file '{}': {}", input_path.display(), e))?;

            let engine = open_engine(&self.run).await?;
            let processor = BatchProcessor::new(engine.clone());

            // Wrap tokio file in a compatibility layer for csv-async
            let compat_file = tokio_util::compat::TokioAsyncReadCompatExt::compat(file);
            let mut reader = AsyncReader::new(compat_file);

            let mut processed = 0usize;
            loop {
                let batch = reader.read_batch(self.config.batch_size).await;
                if batch.is_empty() {
                    break;
                }

                // Wait for the whole batch so a card spanning batches keeps its order
                for result in processor.process_batch(batch).await {
                    log_outcome(&result.command, &result.result);
                    processed += 1;
                }
            }
            info!(commands = processed, "Input processed");

            write_report(&engine, &self.run.report, output).await
        })
    }
}

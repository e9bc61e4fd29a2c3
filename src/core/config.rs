//! Engine configuration

use std::time::Duration;

/// Default bound on waiting for a card or assignment lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Runtime settings of a [`crate::core::LedgerEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// How long a mutation waits for its card lock before failing as retryable
    pub lock_timeout: Duration,

    /// Seed for the card number generator; `None` seeds from OS entropy
    pub card_number_seed: Option<u64>,
}

impl LedgerConfig {
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.card_number_seed = Some(seed);
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            card_number_seed: None,
        }
    }
}

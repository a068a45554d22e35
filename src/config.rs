//! Ledger configuration
//!
//! Tunables for lock waiting, retries, account-number generation and history
//! paging. Invalid (zero) values fall back to the defaults with a warning.

use std::time::Duration;

/// Configuration for the ledger core
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Maximum time to wait for one account lock before failing with `LockTimeout`
    pub lock_timeout: Duration,

    /// How many times the transfer engine retries after a `LockTimeout`
    pub lock_retries: u32,

    /// Pause before each retry, multiplied by the attempt number
    pub retry_backoff: Duration,

    /// How many account numbers are tried before `AccountNumberGenerationExhausted`
    pub account_number_attempts: u32,

    /// Page size used when a history query does not specify one
    pub default_page_size: usize,

    /// Upper bound for history page sizes
    pub max_page_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            lock_retries: 3,
            retry_backoff: Duration::from_millis(10),
            account_number_attempts: 5,
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl LedgerConfig {
    /// Create a LedgerConfig, replacing zero values with defaults
    ///
    /// `lock_retries` may legitimately be zero (no retries) and is taken as is.
    pub fn new(
        lock_timeout: Duration,
        lock_retries: u32,
        account_number_attempts: u32,
        default_page_size: usize,
    ) -> Self {
        let default = Self::default();

        let lock_timeout = if lock_timeout.is_zero() {
            tracing::warn!(
                default_ms = default.lock_timeout.as_millis() as u64,
                "Invalid lock_timeout (0), using default"
            );
            default.lock_timeout
        } else {
            lock_timeout
        };

        let account_number_attempts = if account_number_attempts == 0 {
            tracing::warn!(
                default = default.account_number_attempts,
                "Invalid account_number_attempts (0), using default"
            );
            default.account_number_attempts
        } else {
            account_number_attempts
        };

        let default_page_size = if default_page_size == 0 {
            tracing::warn!(
                default = default.default_page_size,
                "Invalid default_page_size (0), using default"
            );
            default.default_page_size
        } else {
            default_page_size.min(default.max_page_size)
        };

        Self {
            lock_timeout,
            lock_retries,
            account_number_attempts,
            default_page_size,
            ..default
        }
    }

    /// Same configuration with a different lock-wait timeout
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        if !lock_timeout.is_zero() {
            self.lock_timeout = lock_timeout;
        }
        self
    }
}

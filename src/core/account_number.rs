//! Account number generation
//!
//! Account numbers have the form `YYYYMMDD` + 5-digit daily sequence +
//! 3 random alphanumeric characters, e.g. `2023121500001ABC`.
//!
//! # Allocation
//!
//! The generator does not own the sequence counter. The ledger store
//! increments the per-date sequence inside the same atomic unit that inserts
//! the account, then hands the sequence to [`AccountNumberGenerator::allocate`],
//! which composes candidates and retries on `DuplicateAccountNumber` (a
//! collision on the random suffix) up to the configured number of attempts.

use std::sync::Arc;

use chrono::NaiveDate;

use super::clock::Clock;
use super::random::{RandomSource, ALPHANUMERIC};
use crate::types::LedgerError;

/// Highest sequence that fits in five digits
pub const MAX_DAILY_SEQUENCE: u32 = 99_999;

/// Length of the random suffix
pub const SUFFIX_LEN: usize = 3;

/// Total length of an account number
pub const ACCOUNT_NUMBER_LEN: usize = 8 + 5 + SUFFIX_LEN;

/// Parsed account number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountNumber {
    pub date: NaiveDate,
    pub sequence: u32,
    pub suffix: String,
}

impl AccountNumber {
    /// Split an account number into its parts
    ///
    /// Returns `None` unless the input is exactly 16 characters of a valid
    /// `YYYYMMDD` date, five digits, and three characters of `A-Z0-9`.
    pub fn parse(value: &str) -> Option<Self> {
        if value.len() != ACCOUNT_NUMBER_LEN || !value.is_ascii() {
            return None;
        }

        let (date_part, rest) = value.split_at(8);
        let (sequence_part, suffix) = rest.split_at(5);

        if !date_part.bytes().all(|b| b.is_ascii_digit())
            || !sequence_part.bytes().all(|b| b.is_ascii_digit())
            || !suffix.bytes().all(|b| ALPHANUMERIC.contains(&b))
        {
            return None;
        }

        let date = NaiveDate::parse_from_str(date_part, "%Y%m%d").ok()?;
        let sequence = sequence_part.parse().ok()?;

        Some(AccountNumber {
            date,
            sequence,
            suffix: suffix.to_string(),
        })
    }
}

/// Produces account numbers from an injected clock and random source
#[derive(Clone)]
pub struct AccountNumberGenerator {
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    max_attempts: u32,
}

impl std::fmt::Debug for AccountNumberGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountNumberGenerator")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl AccountNumberGenerator {
    /// Create a generator
    ///
    /// `max_attempts` below 1 is treated as 1.
    pub fn new(clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>, max_attempts: u32) -> Self {
        Self {
            clock,
            random,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Date new account numbers are generated for
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Compose one candidate number for a date and sequence
    ///
    /// # Errors
    ///
    /// `AccountNumberGenerationExhausted` if the sequence is 0 or does not fit
    /// in five digits.
    pub fn compose(&self, date: NaiveDate, sequence: u32) -> Result<String, LedgerError> {
        if sequence == 0 || sequence > MAX_DAILY_SEQUENCE {
            return Err(LedgerError::AccountNumberGenerationExhausted { date, attempts: 0 });
        }

        let suffix = self.random.random_alphanumeric(SUFFIX_LEN);
        Ok(format!("{}{:05}{}", date.format("%Y%m%d"), sequence, suffix))
    }

    /// Compose candidates and hand each to `insert` until one is accepted
    ///
    /// `insert` reports a collision by returning `DuplicateAccountNumber`, which
    /// triggers another attempt with a fresh suffix. Any other error is returned
    /// immediately.
    ///
    /// # Errors
    ///
    /// `AccountNumberGenerationExhausted` once every attempt collided.
    pub fn allocate<T, F>(&self, date: NaiveDate, sequence: u32, mut insert: F) -> Result<T, LedgerError>
    where
        F: FnMut(&str) -> Result<T, LedgerError>,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = self.compose(date, sequence)?;
            match insert(&candidate) {
                Err(LedgerError::DuplicateAccountNumber { number }) => {
                    tracing::debug!(%number, attempt, "account number collision, regenerating");
                }
                other => return other,
            }
        }

        tracing::warn!(%date, sequence, attempts = self.max_attempts, "account number generation exhausted");
        Err(LedgerError::AccountNumberGenerationExhausted {
            date,
            attempts: self.max_attempts,
        })
    }
}

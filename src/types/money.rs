//! Monetary amounts in integer minor units
//!
//! `Money` is a signed count of minor units (cents). Arithmetic is always
//! checked and never goes through floating point. Conversion to and from
//! decimal major units exists for the collaborator layer (CSV input/output);
//! the core itself only ever deals in minor units.

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Number of minor units in one major unit
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Signed amount of money in minor units
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero minor units
    pub const ZERO: Money = Money(0);

    /// Wrap a raw minor-unit count without validation
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Create a strictly positive amount
    ///
    /// # Errors
    ///
    /// `InvalidAmount` if `minor <= 0`.
    pub fn positive(minor: i64) -> Result<Self, LedgerError> {
        if minor <= 0 {
            return Err(LedgerError::invalid_amount(minor));
        }
        Ok(Money(minor))
    }

    /// Create a zero or positive amount
    ///
    /// # Errors
    ///
    /// `InvalidAmount` if `minor < 0`.
    pub fn non_negative(minor: i64) -> Result<Self, LedgerError> {
        if minor < 0 {
            return Err(LedgerError::invalid_amount(minor));
        }
        Ok(Money(minor))
    }

    /// Raw minor-unit count
    pub const fn minor_units(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Checked addition
    ///
    /// # Errors
    ///
    /// `AmountOverflow` if the result does not fit in an `i64`.
    pub fn checked_add(self, other: Money) -> Result<Money, LedgerError> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| LedgerError::amount_overflow("add"))
    }

    /// Checked subtraction
    ///
    /// # Errors
    ///
    /// `AmountOverflow` if the result does not fit in an `i64`.
    pub fn checked_sub(self, other: Money) -> Result<Money, LedgerError> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| LedgerError::amount_overflow("subtract"))
    }

    /// Checked negation
    ///
    /// # Errors
    ///
    /// `AmountOverflow` for `i64::MIN`.
    pub fn checked_neg(self) -> Result<Money, LedgerError> {
        self.0
            .checked_neg()
            .map(Money)
            .ok_or_else(|| LedgerError::amount_overflow("negate"))
    }

    /// Checked sum of an iterator of amounts
    ///
    /// # Errors
    ///
    /// `AmountOverflow` as soon as a partial sum overflows.
    pub fn sum<I>(amounts: I) -> Result<Money, LedgerError>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |total, amount| total.checked_add(amount))
    }

    /// Convert a decimal amount of major units (e.g. `10.50`) into minor units
    ///
    /// # Errors
    ///
    /// `InvalidAmount` if the value has more precision than one minor unit or
    /// does not fit in an `i64` count of minor units.
    pub fn from_major(major: Decimal) -> Result<Money, LedgerError> {
        let minor = major
            .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
            .ok_or_else(|| LedgerError::invalid_amount(major))?;

        if !minor.fract().is_zero() {
            return Err(LedgerError::invalid_amount(major));
        }

        minor
            .to_i64()
            .map(Money)
            .ok_or_else(|| LedgerError::invalid_amount(major))
    }

    /// Decimal amount of major units, with two fractional digits
    pub fn to_major(self) -> Decimal {
        Decimal::new(self.0, 2)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses an integer count of minor units
///
/// Non-integer input (`"12.5"`, `"1e3"`, `"abc"`) and values outside the `i64`
/// range are rejected with `InvalidAmount`.
impl FromStr for Money {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Money)
            .map_err(|_| LedgerError::invalid_amount(s))
    }
}

impl TryFrom<i128> for Money {
    type Error = LedgerError;

    fn try_from(value: i128) -> Result<Self, Self::Error> {
        i64::try_from(value)
            .map(Money)
            .map_err(|_| LedgerError::invalid_amount(value))
    }
}

impl TryFrom<u64> for Money {
    type Error = LedgerError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        i64::try_from(value)
            .map(Money)
            .map_err(|_| LedgerError::invalid_amount(value))
    }
}

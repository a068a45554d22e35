//! Account-related types for the ledger
//!
//! This module defines the Account record and the identifier types shared by
//! the rest of the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::money::Money;

/// Account identifier (assigned by the ledger store, starting at 1)
pub type AccountId = u64;

/// Customer identifier (assigned by the customer directory)
pub type CustomerId = u64;

/// Reserved id of the system clearing account
///
/// Money entering the ledger (deposits) is debited here and money leaving it
/// (withdrawals) is credited here, so every transaction stays balanced. The
/// clearing account belongs to no customer, may carry a negative balance, and
/// is never returned by account lookups.
pub const CLEARING_ACCOUNT: AccountId = 0;

/// Customer account state
///
/// The balance is a cached projection of the entry log: it always equals the
/// signed sum of every committed entry referencing this account, and it is
/// only ever changed by a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Store-assigned identifier
    pub id: AccountId,

    /// Unique human-meaningful number, `YYYYMMDD` + 5-digit sequence + 3 characters
    pub number: String,

    /// Owning customer
    pub customer_id: CustomerId,

    /// Committed balance in minor units (never negative)
    pub balance: Money,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with a zero balance
    pub fn new(
        id: AccountId,
        number: String,
        customer_id: CustomerId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Account {
            id,
            number,
            customer_id,
            balance: Money::ZERO,
            created_at,
        }
    }
}

/// Registered customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    /// Unique (case-insensitive) email address
    pub email: String,
}

//! Script operation records
//!
//! An `Operation` is one row of a ledger script as read from CSV. Accounts and
//! customers are referred to by labels chosen by the script author; the
//! session maps labels onto store-assigned ids.

use super::money::Money;

/// Operations a script can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Register a customer (customer label, email in the memo)
    Register,

    /// Open an account for a customer with an initial deposit
    Open,

    /// Deposit money into an account
    Deposit,

    /// Withdraw money from an account
    Withdraw,

    /// Transfer money between two accounts
    Transfer,
}

impl OperationKind {
    /// Name of the operation as written in scripts
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Register => "register",
            OperationKind::Open => "open",
            OperationKind::Deposit => "deposit",
            OperationKind::Withdraw => "withdraw",
            OperationKind::Transfer => "transfer",
        }
    }

    /// Parse an operation name, ignoring case
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "register" => Some(OperationKind::Register),
            "open" => Some(OperationKind::Open),
            "deposit" => Some(OperationKind::Deposit),
            "withdraw" | "withdrawal" => Some(OperationKind::Withdraw),
            "transfer" => Some(OperationKind::Transfer),
            _ => None,
        }
    }
}

/// Key an operation touches, used to keep dependent operations in order
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKey {
    Account(String),
    Customer(String),
    /// Lowercased email of a registration; emails are unique across customers
    Email(String),
}

/// One script row
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Line number in the script file (the header is line 1)
    pub line: usize,

    pub kind: OperationKind,

    /// Account label (source account for transfers)
    pub account: Option<String>,

    /// Destination account label (transfers only)
    pub to: Option<String>,

    /// Customer label
    pub customer: Option<String>,

    /// Amount in minor units
    pub amount: Option<Money>,

    /// Free text: email for `register`, description otherwise
    pub memo: Option<String>,
}

impl Operation {
    /// Every account and customer key this operation reads or writes
    pub fn keys(&self) -> Vec<OperationKey> {
        let mut keys = Vec::with_capacity(3);
        if let Some(account) = &self.account {
            keys.push(OperationKey::Account(account.clone()));
        }
        if let Some(to) = &self.to {
            keys.push(OperationKey::Account(to.clone()));
        }
        if let Some(customer) = &self.customer {
            keys.push(OperationKey::Customer(customer.clone()));
        }
        if self.kind == OperationKind::Register {
            if let Some(email) = &self.memo {
                keys.push(OperationKey::Email(email.to_lowercase()));
            }
        }
        keys
    }
}

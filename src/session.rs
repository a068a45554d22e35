//! Script sessions
//!
//! A `LedgerSession` applies script operations to a ledger. Scripts name
//! customers and accounts with labels; the session maps each label to the id
//! the registry or store assigned when it was created.
//!
//! The session is `Sync`: independent operations may be applied from several
//! threads at once. Operations sharing a label must be applied in script order
//! by the caller.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use crate::config::LedgerConfig;
use crate::core::clock::Clock;
use crate::core::random::RandomSource;
use crate::core::traits::{AuditReport, CustomerDirectory, LedgerStore};
use crate::core::Ledger;
use crate::directory::{CustomerRegistry, DirectoryError};
use crate::types::{AccountId, CustomerId, LedgerError, Money, Operation, OperationKind};

/// Errors raised while applying a script operation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("Missing '{field}' for {operation} operation")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },

    #[error("Unknown account '{label}'")]
    UnknownAccount { label: String },

    #[error("Unknown customer '{label}'")]
    UnknownCustomer { label: String },

    #[error("{kind} '{label}' is already defined")]
    DuplicateLabel { kind: &'static str, label: String },
}

/// Final state of one labelled account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    pub label: String,
    pub customer: String,
    pub account_id: AccountId,
    pub balance: Money,
}

#[derive(Debug, Clone)]
struct AccountSlot {
    id: AccountId,
    customer: String,
}

fn required<'o, T>(value: &'o Option<T>, operation: &Operation, field: &'static str) -> Result<&'o T, SessionError> {
    value.as_ref().ok_or(SessionError::MissingField {
        operation: operation.kind.as_str(),
        field,
    })
}

/// Applies script operations to a ledger
pub struct LedgerSession<S> {
    ledger: Ledger<S>,
    registry: Arc<CustomerRegistry>,
    customers: DashMap<String, CustomerId>,
    accounts: DashMap<String, AccountSlot>,
}

impl<S: LedgerStore> LedgerSession<S> {
    /// Create a session over an empty customer registry
    pub fn new(store: S, clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>, config: LedgerConfig) -> Self {
        let registry = Arc::new(CustomerRegistry::new());
        let directory: Arc<dyn CustomerDirectory> = registry.clone();

        Self {
            ledger: Ledger::new(store, directory, clock, random, config),
            registry,
            customers: DashMap::new(),
            accounts: DashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn registry(&self) -> &CustomerRegistry {
        &self.registry
    }

    fn customer_id(&self, label: &str) -> Result<CustomerId, SessionError> {
        self.customers
            .get(label)
            .map(|id| *id)
            .ok_or_else(|| SessionError::UnknownCustomer {
                label: label.to_string(),
            })
    }

    fn account_id(&self, label: &str) -> Result<AccountId, SessionError> {
        self.accounts
            .get(label)
            .map(|slot| slot.id)
            .ok_or_else(|| SessionError::UnknownAccount {
                label: label.to_string(),
            })
    }

    /// Apply one operation
    ///
    /// # Errors
    ///
    /// Returns the ledger or directory error that rejected the operation, or
    /// a session error for missing fields and unknown or duplicate labels.
    /// A rejected operation changes nothing.
    pub fn apply(&self, operation: &Operation) -> Result<(), SessionError> {
        match operation.kind {
            OperationKind::Register => self.register(operation),
            OperationKind::Open => self.open(operation),
            OperationKind::Deposit => {
                let account = self.account_id(required(&operation.account, operation, "account")?)?;
                let amount = *required(&operation.amount, operation, "amount")?;
                self.ledger
                    .deposit(account, amount, operation.memo.clone())?;
                Ok(())
            }
            OperationKind::Withdraw => {
                let account = self.account_id(required(&operation.account, operation, "account")?)?;
                let amount = *required(&operation.amount, operation, "amount")?;
                self.ledger
                    .withdraw(account, amount, operation.memo.clone())?;
                Ok(())
            }
            OperationKind::Transfer => {
                let from = self.account_id(required(&operation.account, operation, "account")?)?;
                let to = self.account_id(required(&operation.to, operation, "to")?)?;
                let amount = *required(&operation.amount, operation, "amount")?;
                self.ledger
                    .transfer(from, to, amount, operation.memo.clone())?;
                Ok(())
            }
        }
    }

    fn register(&self, operation: &Operation) -> Result<(), SessionError> {
        let label = required(&operation.customer, operation, "customer")?;
        let email = required(&operation.memo, operation, "memo")?;

        if self.customers.contains_key(label) {
            return Err(SessionError::DuplicateLabel {
                kind: "Customer",
                label: label.clone(),
            });
        }

        let customer = self.registry.register(label, email)?;
        self.customers.insert(label.clone(), customer.id);
        Ok(())
    }

    fn open(&self, operation: &Operation) -> Result<(), SessionError> {
        let label = required(&operation.account, operation, "account")?;
        let customer_label = required(&operation.customer, operation, "customer")?;
        let deposit = operation.amount.unwrap_or(Money::ZERO);

        if self.accounts.contains_key(label) {
            return Err(SessionError::DuplicateLabel {
                kind: "Account",
                label: label.clone(),
            });
        }

        let customer = self.customer_id(customer_label)?;
        let account = self.ledger.create_account(customer, deposit)?;
        self.accounts.insert(
            label.clone(),
            AccountSlot {
                id: account.id,
                customer: customer_label.clone(),
            },
        );
        Ok(())
    }

    /// Apply an operation, logging and swallowing a rejection
    ///
    /// # Returns
    ///
    /// `true` if the operation was applied
    pub fn apply_logged(&self, operation: &Operation) -> bool {
        match self.apply(operation) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(line = operation.line, op = operation.kind.as_str(), %error, "operation rejected");
                false
            }
        }
    }

    /// Committed balance of every labelled account, sorted by label
    pub fn account_summaries(&self) -> Result<Vec<AccountSummary>, LedgerError> {
        let mut summaries = self
            .accounts
            .iter()
            .map(|slot| {
                Ok(AccountSummary {
                    label: slot.key().clone(),
                    customer: slot.customer.clone(),
                    account_id: slot.id,
                    balance: self.ledger.get_balance(slot.id)?,
                })
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;

        summaries.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(summaries)
    }

    /// Run the ledger audit
    pub fn audit(&self) -> Result<AuditReport, LedgerError> {
        self.ledger.audit()
    }
}

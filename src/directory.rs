//! Customer registry
//!
//! An in-memory customer directory used by the script driver and tests. The
//! ledger core only asks it whether a customer id exists.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::core::traits::CustomerDirectory;
use crate::types::{Customer, CustomerId};

/// Errors raised when registering customers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("Email '{email}' is already registered")]
    DuplicateEmail { email: String },

    #[error("Invalid email '{email}'")]
    InvalidEmail { email: String },
}

/// Minimal shape check: one `@`, a non-empty local part and a dotted domain
fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// Thread-safe customer registry with unique, case-insensitive emails
#[derive(Debug)]
pub struct CustomerRegistry {
    customers: DashMap<CustomerId, Customer>,
    /// Lower-cased email → customer id
    emails: DashMap<String, CustomerId>,
    next_id: AtomicU64,
}

impl CustomerRegistry {
    pub fn new() -> Self {
        Self {
            customers: DashMap::new(),
            emails: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a customer
    ///
    /// # Errors
    ///
    /// - `InvalidEmail` if the email is malformed
    /// - `DuplicateEmail` if the email (ignoring case) is already registered
    pub fn register(&self, name: &str, email: &str) -> Result<Customer, DirectoryError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(DirectoryError::InvalidEmail {
                email: email.to_string(),
            });
        }

        match self.emails.entry(email.to_lowercase()) {
            Entry::Occupied(_) => Err(DirectoryError::DuplicateEmail {
                email: email.to_string(),
            }),
            Entry::Vacant(slot) => {
                let customer = Customer {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    name: name.to_string(),
                    email: email.to_string(),
                };
                self.customers.insert(customer.id, customer.clone());
                slot.insert(customer.id);
                Ok(customer)
            }
        }
    }

    pub fn get(&self, customer_id: CustomerId) -> Option<Customer> {
        self.customers
            .get(&customer_id)
            .map(|customer| customer.value().clone())
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }
}

impl Default for CustomerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomerDirectory for CustomerRegistry {
    fn customer_exists(&self, customer_id: CustomerId) -> bool {
        self.customers.contains_key(&customer_id)
    }
}

//! Transaction history reads
//!
//! History is derived from committed entries: the distinct transactions that
//! have at least one entry on the account, returned one page at a time.

use crate::config::LedgerConfig;
use crate::core::traits::LedgerStore;
use crate::types::{AccountId, LedgerError, Transaction};

/// Direction history pages are sorted in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryOrder {
    /// Most recent transaction first
    #[default]
    NewestFirst,
    /// Oldest transaction first
    OldestFirst,
}

/// Window into a history listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Pagination {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// The window immediately after this one
    pub fn next(&self) -> Self {
        Self {
            offset: self.offset.saturating_add(self.limit),
            limit: self.limit,
        }
    }
}

/// Parameters of a history read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub order: HistoryOrder,
    /// `None` reads from the start with the configured default page size
    pub page: Option<Pagination>,
}

impl HistoryQuery {
    pub fn newest_first() -> Self {
        Self::default()
    }

    pub fn oldest_first() -> Self {
        Self {
            order: HistoryOrder::OldestFirst,
            page: None,
        }
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.page = Some(Pagination::new(offset, limit));
        self
    }
}

/// One page of an account's history
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub account_id: AccountId,
    pub transactions: Vec<Transaction>,
    /// Window of the following page, `None` when this page is the last
    pub next: Option<Pagination>,
}

/// Reads paginated history from a store
#[derive(Debug)]
pub struct HistoryReader<'a, S> {
    store: &'a S,
    default_page_size: usize,
    max_page_size: usize,
}

impl<'a, S: LedgerStore> HistoryReader<'a, S> {
    pub fn new(store: &'a S, config: &LedgerConfig) -> Self {
        Self {
            store,
            default_page_size: config.default_page_size.max(1),
            max_page_size: config.max_page_size.max(1),
        }
    }

    /// Read one page of committed transactions touching `account_id`
    ///
    /// The requested limit is clamped to `1..=max_page_size`. Each transaction
    /// appears at most once even if it has several entries on the account.
    ///
    /// # Errors
    ///
    /// `AccountNotFound` if the account does not exist.
    pub fn read(&self, account_id: AccountId, query: HistoryQuery) -> Result<HistoryPage, LedgerError> {
        let page = query
            .page
            .unwrap_or_else(|| Pagination::new(0, self.default_page_size));
        let page = Pagination::new(page.offset, page.limit.clamp(1, self.max_page_size));

        // One extra row tells us whether another page exists
        let mut transactions =
            self.store
                .history(account_id, query.order, page.offset, page.limit.saturating_add(1))?;

        let next = if transactions.len() > page.limit {
            transactions.truncate(page.limit);
            Some(page.next())
        } else {
            None
        };

        Ok(HistoryPage {
            account_id,
            transactions,
            next,
        })
    }

    /// Read every committed transaction touching `account_id`, page by page
    pub fn read_all(&self, account_id: AccountId, order: HistoryOrder) -> Result<Vec<Transaction>, LedgerError> {
        let mut all = Vec::new();
        let mut query = HistoryQuery {
            order,
            page: Some(Pagination::new(0, self.max_page_size)),
        };

        loop {
            let page = self.read(account_id, query)?;
            all.extend(page.transactions);
            match page.next {
                Some(next) => query.page = Some(next),
                None => return Ok(all),
            }
        }
    }
}

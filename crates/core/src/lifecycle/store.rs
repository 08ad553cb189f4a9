use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::domain::history::QuoteStatusHistory;
use crate::domain::quote::{CompanyId, Quote, QuoteId, QuoteNumber, QuoteStatus};
use crate::errors::StoreError;

/// How the sweeper decides that an open quote is stale. A run uses exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "days", rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// `valid_until` lies strictly before the sweep date.
    ValidUntil,
    /// `quote_date` is at least this many days before the sweep date.
    OlderThanDays(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpiryCriteria {
    pub as_of: NaiveDate,
    pub company_id: Option<CompanyId>,
    pub policy: ExpiryPolicy,
}

impl ExpiryCriteria {
    pub const OPEN_STATUSES: [QuoteStatus; 2] = [QuoteStatus::Sent, QuoteStatus::Pending];

    /// Latest `quote_date` still considered stale under `OlderThanDays`.
    pub fn age_cutoff(&self, days: u32) -> NaiveDate {
        self.as_of.checked_sub_days(Days::new(u64::from(days))).unwrap_or(NaiveDate::MIN)
    }

    pub fn matches(&self, quote: &Quote) -> bool {
        if !Self::OPEN_STATUSES.contains(&quote.status) {
            return false;
        }
        if let Some(company_id) = &self.company_id {
            if &quote.company_id != company_id {
                return false;
            }
        }

        match self.policy {
            ExpiryPolicy::ValidUntil => quote.valid_until < self.as_of,
            ExpiryPolicy::OlderThanDays(days) => quote.quote_date <= self.age_cutoff(days),
        }
    }
}

/// Durable home of quotes and their status history.
///
/// Every write that touches `status` goes through
/// [`QuoteStore::save_quote_and_history`], which must persist the quote row and
/// the history row as one unit and refuse the write when the stored status no
/// longer equals `expected`.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn load_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError>;

    /// Inserts a new quote with its creation record. A missing quote number is
    /// allocated from the company's sequence for the quote's year.
    async fn insert_quote(
        &self,
        quote: Quote,
        created: QuoteStatusHistory,
        number_prefix: &str,
    ) -> Result<Quote, StoreError>;

    /// Writes the status fields of `quote` (`status`, `sent_at` if not yet
    /// latched, `updated_at`) and returns the quote as committed. Lines and
    /// totals are never taken from `quote`.
    async fn save_quote_and_history(
        &self,
        quote: &Quote,
        expected: QuoteStatus,
        history: QuoteStatusHistory,
    ) -> Result<Quote, StoreError>;

    /// Rewrites lines, pricing inputs and validity of a quote that is still a draft.
    async fn save_draft(&self, quote: &Quote) -> Result<(), StoreError>;

    /// Status history in ascending order.
    async fn history(&self, id: &QuoteId) -> Result<Vec<QuoteStatusHistory>, StoreError>;

    async fn expiry_candidates(&self, criteria: &ExpiryCriteria) -> Result<Vec<Quote>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    quotes: HashMap<String, Quote>,
    history: Vec<QuoteStatusHistory>,
    sequences: HashMap<(String, i32), u32>,
    fail_next_history_write: bool,
}

#[derive(Default)]
pub struct InMemoryQuoteStore {
    state: RwLock<MemoryState>,
}

impl InMemoryQuoteStore {
    /// Makes the next history append fail as if the process died mid-write.
    pub async fn fail_next_history_write(&self) {
        self.state.write().await.fail_next_history_write = true;
    }
}

#[async_trait]
impl QuoteStore for InMemoryQuoteStore {
    async fn load_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        let state = self.state.read().await;
        Ok(state.quotes.get(&id.0).cloned())
    }

    async fn insert_quote(
        &self,
        mut quote: Quote,
        created: QuoteStatusHistory,
        number_prefix: &str,
    ) -> Result<Quote, StoreError> {
        let mut state = self.state.write().await;
        if state.fail_next_history_write {
            state.fail_next_history_write = false;
            return Err(StoreError::Backend("history write interrupted".to_string()));
        }

        if let Some(number) = &quote.quote_number {
            let taken = state.quotes.values().any(|existing| {
                existing.company_id == quote.company_id
                    && existing.quote_number.as_ref() == Some(number)
            });
            if taken {
                return Err(StoreError::DuplicateNumber(number.clone()));
            }
        } else {
            let year = quote.quote_date.year();
            let key = (quote.company_id.0.clone(), year);
            let next = state.sequences.get(&key).copied().unwrap_or(0) + 1;
            state.sequences.insert(key, next);
            quote.quote_number = Some(QuoteNumber::format(number_prefix, year, next));
        }

        state.quotes.insert(quote.id.0.clone(), quote.clone());
        state.history.push(created);
        Ok(quote)
    }

    async fn save_quote_and_history(
        &self,
        quote: &Quote,
        expected: QuoteStatus,
        history: QuoteStatusHistory,
    ) -> Result<Quote, StoreError> {
        let mut state = self.state.write().await;
        let current = state
            .quotes
            .get(&quote.id.0)
            .map(|stored| stored.status)
            .ok_or_else(|| StoreError::NotFound(quote.id.clone()))?;

        if current != expected {
            return Err(StoreError::StatusMismatch { quote_id: quote.id.clone(), expected });
        }
        if state.fail_next_history_write {
            state.fail_next_history_write = false;
            return Err(StoreError::Backend("history write interrupted".to_string()));
        }

        let stored = state
            .quotes
            .get_mut(&quote.id.0)
            .ok_or_else(|| StoreError::NotFound(quote.id.clone()))?;
        stored.status = quote.status;
        stored.sent_at = stored.sent_at.or(quote.sent_at);
        stored.updated_at = quote.updated_at;
        let committed = stored.clone();

        state.history.push(history);
        Ok(committed)
    }

    async fn save_draft(&self, quote: &Quote) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .quotes
            .get_mut(&quote.id.0)
            .ok_or_else(|| StoreError::NotFound(quote.id.clone()))?;

        if stored.status != QuoteStatus::Draft {
            return Err(StoreError::StatusMismatch {
                quote_id: quote.id.clone(),
                expected: QuoteStatus::Draft,
            });
        }

        stored.lines = quote.lines.clone();
        stored.discount = quote.discount;
        stored.shipping = quote.shipping;
        stored.totals = quote.totals;
        stored.valid_until = quote.valid_until;
        stored.updated_at = quote.updated_at;
        Ok(())
    }

    async fn history(&self, id: &QuoteId) -> Result<Vec<QuoteStatusHistory>, StoreError> {
        let state = self.state.read().await;
        let mut rows: Vec<_> =
            state.history.iter().filter(|entry| &entry.quote_id == id).cloned().collect();
        // Stable sort keeps insertion order for equal timestamps.
        rows.sort_by_key(|entry| entry.occurred_at);
        Ok(rows)
    }

    async fn expiry_candidates(&self, criteria: &ExpiryCriteria) -> Result<Vec<Quote>, StoreError> {
        let state = self.state.read().await;
        let mut candidates: Vec<_> =
            state.quotes.values().filter(|quote| criteria.matches(quote)).cloned().collect();
        candidates.sort_by(|left, right| {
            left.valid_until.cmp(&right.valid_until).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(candidates)
    }
}

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::domain::history::QuoteStatusHistory;
use crate::domain::quote::{ActorId, NewQuote, Quote, QuoteId, QuoteRevision, QuoteStatus};
use crate::errors::{ApplicationError, DomainError};
use crate::lifecycle::events::{NoopEventSink, QuoteStatusChanged, StatusEventSink};
use crate::lifecycle::policy::check_transition;
use crate::lifecycle::store::QuoteStore;
use crate::totals::validate_pricing_inputs;

pub const CREATED_COMMENT: &str = "created";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub default_validity_days: u32,
    pub quote_number_prefix: String,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self { default_validity_days: 30, quote_number_prefix: "Q".to_string() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionRequest {
    pub to: QuoteStatus,
    pub actor: Option<ActorId>,
    pub reason: Option<String>,
}

impl TransitionRequest {
    pub fn new(to: QuoteStatus) -> Self {
        Self { to, actor: None, reason: None }
    }

    pub fn by(mut self, actor: ActorId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransitionOutcome {
    Applied { quote: Quote, from: QuoteStatus, history: QuoteStatusHistory },
    /// The quote was already in the requested status.
    Unchanged { quote: Quote },
}

impl TransitionOutcome {
    pub fn quote(&self) -> &Quote {
        match self {
            Self::Applied { quote, .. } | Self::Unchanged { quote } => quote,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Comment recorded when the caller gives no reason.
pub fn default_comment(status: QuoteStatus) -> &'static str {
    match status {
        QuoteStatus::Draft => CREATED_COMMENT,
        QuoteStatus::Sent => "sent to client",
        QuoteStatus::Pending => "awaiting response",
        QuoteStatus::Accepted => "accepted by client",
        QuoteStatus::Rejected => "rejected by client",
        QuoteStatus::Expired => "expired automatically",
        QuoteStatus::Cancelled => "cancelled",
    }
}

/// The only writer of `Quote::status`.
///
/// Every call re-reads the quote from the store, so two engines sharing a
/// store never act on a stale status. A successful transition commits the new
/// status and its history row together and only then publishes a
/// [`QuoteStatusChanged`] to the event sink.
pub struct TransitionEngine<S, C> {
    store: Arc<S>,
    clock: C,
    events: Arc<dyn StatusEventSink>,
    settings: LifecycleSettings,
}

impl<S, C> TransitionEngine<S, C>
where
    S: QuoteStore,
    C: Clock,
{
    pub fn new(store: Arc<S>, clock: C) -> Self {
        Self {
            store,
            clock,
            events: Arc::new(NoopEventSink),
            settings: LifecycleSettings::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn StatusEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub async fn load(&self, id: &QuoteId) -> Result<Quote, ApplicationError> {
        self.store.load_quote(id).await?.ok_or_else(|| ApplicationError::NotFound(id.clone()))
    }

    pub async fn history(&self, id: &QuoteId) -> Result<Vec<QuoteStatusHistory>, ApplicationError> {
        self.load(id).await?;
        Ok(self.store.history(id).await?)
    }

    pub async fn create(
        &self,
        input: NewQuote,
        actor: Option<ActorId>,
    ) -> Result<Quote, ApplicationError> {
        self.create_with_comment(input, actor, CREATED_COMMENT.to_string()).await
    }

    /// Copies content and client of `source_id` into a fresh draft dated today.
    pub async fn duplicate(
        &self,
        source_id: &QuoteId,
        actor: Option<ActorId>,
    ) -> Result<Quote, ApplicationError> {
        let source = self.load(source_id).await?;
        let today = self.clock.now().date_naive();
        let input = NewQuote {
            company_id: source.company_id.clone(),
            client_id: source.client_id.clone(),
            quote_number: None,
            quote_date: today,
            valid_until: None,
            lines: source.lines.clone(),
            discount: source.discount,
            shipping: source.shipping,
        };

        let comment = format!("duplicated from {}", source.display_number());
        let copy = self.create_with_comment(input, actor, comment).await?;
        info!(
            event_name = "lifecycle.quote.duplicated",
            quote_id = %copy.id,
            source_quote_id = %source.id,
            "quote duplicated"
        );
        Ok(copy)
    }

    pub async fn revise_draft(
        &self,
        id: &QuoteId,
        revision: QuoteRevision,
    ) -> Result<Quote, ApplicationError> {
        let mut quote = self.load(id).await?;
        if quote.status != QuoteStatus::Draft {
            return Err(DomainError::QuoteLocked { status: quote.status }.into());
        }

        validate_pricing_inputs(&revision.lines, revision.discount, revision.shipping)?;
        let valid_until = revision.valid_until.unwrap_or(quote.valid_until);
        ensure_validity(quote.quote_date, valid_until)?;

        quote.lines = revision.lines;
        quote.discount = revision.discount;
        quote.shipping = revision.shipping;
        quote.valid_until = valid_until;
        quote.recompute_totals();
        quote.updated_at = self.clock.now();

        // Guarded on draft status in the store as well.
        self.store.save_draft(&quote).await?;
        Ok(quote)
    }

    pub async fn apply(
        &self,
        id: &QuoteId,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let mut quote = self.load(id).await?;
        let from = quote.status;
        let to = request.to;

        if from == to {
            return Ok(TransitionOutcome::Unchanged { quote });
        }
        if let Err(error) = check_transition(from, to) {
            warn!(
                event_name = "lifecycle.transition.rejected",
                quote_id = %quote.id,
                from = %from,
                to = %to,
                "quote transition rejected"
            );
            return Err(error.into());
        }

        let now = self.clock.now();
        quote.status = to;
        if to == QuoteStatus::Sent && quote.sent_at.is_none() {
            quote.sent_at = Some(now);
        }
        quote.updated_at = now;

        let comment = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| default_comment(to))
            .to_string();
        let history =
            QuoteStatusHistory::record(quote.id.clone(), to, comment, request.actor.clone(), now);

        // The committed row carries any draft revision that landed after the load.
        let quote = self.store.save_quote_and_history(&quote, from, history.clone()).await?;

        info!(
            event_name = "lifecycle.transition.applied",
            quote_id = %quote.id,
            quote_number = %quote.display_number(),
            from = %from,
            to = %to,
            actor = request.actor.as_ref().map(|actor| actor.0.as_str()).unwrap_or("system"),
            "quote transition applied"
        );

        self.events.publish(QuoteStatusChanged {
            quote: quote.clone(),
            from,
            to,
            reason: request.reason,
            actor: request.actor,
            occurred_at: now,
        });

        Ok(TransitionOutcome::Applied { quote, from, history })
    }

    async fn create_with_comment(
        &self,
        input: NewQuote,
        actor: Option<ActorId>,
        comment: String,
    ) -> Result<Quote, ApplicationError> {
        validate_pricing_inputs(&input.lines, input.discount, input.shipping)?;
        let valid_until = match input.valid_until {
            Some(valid_until) => valid_until,
            None => input
                .quote_date
                .checked_add_days(Days::new(u64::from(self.settings.default_validity_days)))
                .ok_or_else(|| {
                    DomainError::InvariantViolation("valid_until is out of range".to_string())
                })?,
        };
        ensure_validity(input.quote_date, valid_until)?;

        let now = self.clock.now();
        let mut quote = Quote {
            id: QuoteId::generate(),
            quote_number: input.quote_number,
            company_id: input.company_id,
            client_id: input.client_id,
            status: QuoteStatus::Draft,
            quote_date: input.quote_date,
            valid_until,
            sent_at: None,
            lines: input.lines,
            discount: input.discount,
            shipping: input.shipping,
            totals: Default::default(),
            created_at: now,
            updated_at: now,
        };
        quote.recompute_totals();

        let created =
            QuoteStatusHistory::record(quote.id.clone(), QuoteStatus::Draft, comment, actor, now);
        let quote = self
            .store
            .insert_quote(quote, created, &self.settings.quote_number_prefix)
            .await?;

        info!(
            event_name = "lifecycle.quote.created",
            quote_id = %quote.id,
            quote_number = %quote.display_number(),
            company_id = %quote.company_id.0,
            "quote created"
        );
        Ok(quote)
    }
}

fn ensure_validity(quote_date: NaiveDate, valid_until: NaiveDate) -> Result<(), DomainError> {
    if valid_until < quote_date {
        return Err(DomainError::InvariantViolation(format!(
            "valid_until {valid_until} is before quote_date {quote_date}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, NaiveDate, Utc};
    use rust_decimal::Decimal;

    use crate::clock::FixedClock;
    use crate::domain::quote::{
        ActorId, ClientId, CompanyId, Discount, NewQuote, QuoteId, QuoteLine, QuoteRevision,
        QuoteStatus,
    };
    use crate::errors::{ApplicationError, DomainError};
    use crate::lifecycle::events::RecordingEventSink;
    use crate::lifecycle::store::{InMemoryQuoteStore, QuoteStore};

    use super::{TransitionEngine, TransitionOutcome, TransitionRequest};

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn line(description: &str, quantity: i64, unit_price: i64, tax_rate: i64) -> QuoteLine {
        QuoteLine {
            description: description.to_string(),
            quantity: Decimal::from(quantity),
            unit_price: Decimal::from(unit_price),
            tax_rate: Decimal::from(tax_rate),
            product_id: None,
        }
    }

    fn new_quote() -> NewQuote {
        NewQuote {
            company_id: CompanyId("acme".to_string()),
            client_id: ClientId("client-9".to_string()),
            quote_number: None,
            quote_date: date("2026-01-10"),
            valid_until: None,
            lines: vec![line("Consulting", 2, 100, 20), line("Setup", 1, 50, 20)],
            discount: Discount::None,
            shipping: Decimal::ZERO,
        }
    }

    fn engine() -> (
        TransitionEngine<InMemoryQuoteStore, FixedClock>,
        RecordingEventSink,
        FixedClock,
    ) {
        let clock = FixedClock::new(ts("2026-01-10T09:00:00Z"));
        let events = RecordingEventSink::default();
        let engine = TransitionEngine::new(Arc::new(InMemoryQuoteStore::default()), clock.clone())
            .with_events(Arc::new(events.clone()));
        (engine, events, clock)
    }

    #[tokio::test]
    async fn create_prices_and_records_draft() {
        let (engine, events, _) = engine();
        let quote = engine.create(new_quote(), Some(ActorId("user-1".to_string()))).await.unwrap();

        assert_eq!(quote.status, QuoteStatus::Draft);
        assert_eq!(quote.totals.subtotal, Decimal::from(250));
        assert_eq!(quote.totals.tax_total, Decimal::from(50));
        assert_eq!(quote.totals.for_display().gross, Decimal::new(30_000, 2));
        assert_eq!(quote.valid_until, date("2026-02-09"));
        assert_eq!(quote.quote_number.as_ref().map(|n| n.0.as_str()), Some("Q-2026-0001"));

        let history = engine.history(&quote.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, QuoteStatus::Draft);
        assert_eq!(history[0].comment, "created");
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_validity_before_quote_date() {
        let (engine, _, _) = engine();
        let mut input = new_quote();
        input.valid_until = Some(date("2026-01-09"));

        let error = engine.create(input, None).await.unwrap_err();
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn send_then_expire_appends_history_and_latches_sent_at() {
        let (engine, events, clock) = engine();
        let quote = engine.create(new_quote(), None).await.unwrap();

        let sent =
            engine.apply(&quote.id, TransitionRequest::new(QuoteStatus::Sent)).await.unwrap();
        let sent_at = sent.quote().sent_at.expect("sent_at latched");
        assert_eq!(sent_at, ts("2026-01-10T09:00:00Z"));
        assert_eq!(engine.history(&quote.id).await.unwrap().len(), 2);

        clock.advance(Duration::days(45));
        let expired = engine
            .apply(&quote.id, TransitionRequest::new(QuoteStatus::Expired))
            .await
            .unwrap();
        assert_eq!(expired.quote().status, QuoteStatus::Expired);
        assert_eq!(expired.quote().sent_at, Some(sent_at));

        let history = engine.history(&quote.id).await.unwrap();
        let statuses: Vec<_> = history.iter().map(|entry| entry.status).collect();
        assert_eq!(statuses, vec![QuoteStatus::Draft, QuoteStatus::Sent, QuoteStatus::Expired]);
        assert_eq!(history[2].comment, "expired automatically");
        assert_eq!(history[2].actor, None);

        let published = events.events();
        assert_eq!(published.len(), 2);
        assert_eq!((published[1].from, published[1].to), (QuoteStatus::Sent, QuoteStatus::Expired));
    }

    #[tokio::test]
    async fn reapplying_current_status_is_a_no_op() {
        let (engine, events, _) = engine();
        let quote = engine.create(new_quote(), None).await.unwrap();
        engine.apply(&quote.id, TransitionRequest::new(QuoteStatus::Sent)).await.unwrap();

        let outcome =
            engine.apply(&quote.id, TransitionRequest::new(QuoteStatus::Sent)).await.unwrap();

        assert!(matches!(outcome, TransitionOutcome::Unchanged { .. }));
        assert_eq!(engine.history(&quote.id).await.unwrap().len(), 2);
        assert_eq!(events.events().len(), 1);
    }

    #[tokio::test]
    async fn invalid_transition_leaves_quote_and_history_untouched() {
        let (engine, events, _) = engine();
        let quote = engine.create(new_quote(), None).await.unwrap();

        let error = engine
            .apply(&quote.id, TransitionRequest::new(QuoteStatus::Accepted))
            .await
            .unwrap_err();

        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::InvalidTransition {
                from: QuoteStatus::Draft,
                to: QuoteStatus::Accepted,
                allowed: vec![QuoteStatus::Sent, QuoteStatus::Cancelled],
            })
        );
        assert_eq!(engine.load(&quote.id).await.unwrap(), quote);
        assert_eq!(engine.history(&quote.id).await.unwrap().len(), 1);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn terminal_quotes_accept_no_further_transition() {
        let (engine, _, _) = engine();
        let quote = engine.create(new_quote(), None).await.unwrap();
        engine.apply(&quote.id, TransitionRequest::new(QuoteStatus::Sent)).await.unwrap();
        engine.apply(&quote.id, TransitionRequest::new(QuoteStatus::Accepted)).await.unwrap();

        for target in [QuoteStatus::Cancelled, QuoteStatus::Draft, QuoteStatus::Expired] {
            let error = engine.apply(&quote.id, TransitionRequest::new(target)).await.unwrap_err();
            assert!(matches!(
                error,
                ApplicationError::Domain(DomainError::InvalidTransition { ref allowed, .. })
                    if allowed.is_empty()
            ));
        }
        assert_eq!(engine.history(&quote.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_history_write_leaves_no_partial_state() {
        let (engine, events, _) = engine();
        let quote = engine.create(new_quote(), None).await.unwrap();
        engine.store().fail_next_history_write().await;

        let error =
            engine.apply(&quote.id, TransitionRequest::new(QuoteStatus::Sent)).await.unwrap_err();

        assert!(matches!(error, ApplicationError::Persistence(_)));
        assert!(error.is_retryable());
        let stored = engine.load(&quote.id).await.unwrap();
        assert_eq!(stored.status, QuoteStatus::Draft);
        assert_eq!(stored.sent_at, None);
        assert_eq!(engine.history(&quote.id).await.unwrap().len(), 1);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn caller_reason_and_actor_are_recorded() {
        let (engine, events, _) = engine();
        let quote = engine.create(new_quote(), None).await.unwrap();
        engine.apply(&quote.id, TransitionRequest::new(QuoteStatus::Sent)).await.unwrap();

        engine
            .apply(
                &quote.id,
                TransitionRequest::new(QuoteStatus::Rejected)
                    .by(ActorId("user-4".to_string()))
                    .because("budget frozen"),
            )
            .await
            .unwrap();

        let history = engine.history(&quote.id).await.unwrap();
        assert_eq!(history[2].comment, "budget frozen");
        assert_eq!(history[2].actor, Some(ActorId("user-4".to_string())));
        assert_eq!(events.events()[1].actor_label(), "user-4");
    }

    #[tokio::test]
    async fn concurrent_accept_and_reject_commit_exactly_one() {
        let (engine, _, _) = engine();
        let engine = Arc::new(engine);
        let quote = engine.create(new_quote(), None).await.unwrap();
        engine.apply(&quote.id, TransitionRequest::new(QuoteStatus::Sent)).await.unwrap();

        let accept = {
            let engine = Arc::clone(&engine);
            let id = quote.id.clone();
            tokio::spawn(async move {
                engine.apply(&id, TransitionRequest::new(QuoteStatus::Accepted)).await
            })
        };
        let reject = {
            let engine = Arc::clone(&engine);
            let id = quote.id.clone();
            tokio::spawn(async move {
                engine.apply(&id, TransitionRequest::new(QuoteStatus::Rejected)).await
            })
        };
        let (accept, reject) = tokio::join!(accept, reject);
        let results = [accept.expect("task"), reject.expect("task")];

        let winners = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(winners, 1);
        for result in &results {
            if let Err(error) = result {
                assert!(matches!(
                    error,
                    ApplicationError::ConcurrentModification { .. }
                        | ApplicationError::Domain(DomainError::InvalidTransition { .. })
                ));
            }
        }
        let history = engine.history(&quote.id).await.unwrap();
        assert_eq!(history.len(), 3);
        let stored = engine.load(&quote.id).await.unwrap();
        assert_eq!(stored.status, history[2].status);
    }

    #[tokio::test]
    async fn duplicate_copies_content_into_new_draft() {
        let (engine, _, clock) = engine();
        let mut input = new_quote();
        input.discount = Discount::Percentage(Decimal::from(10));
        let source = engine.create(input, None).await.unwrap();
        engine.apply(&source.id, TransitionRequest::new(QuoteStatus::Sent)).await.unwrap();

        clock.set(ts("2026-03-01T12:00:00Z"));
        let copy = engine.duplicate(&source.id, Some(ActorId("user-2".to_string()))).await.unwrap();

        assert_ne!(copy.id, source.id);
        assert_eq!(copy.status, QuoteStatus::Draft);
        assert_eq!(copy.sent_at, None);
        assert_eq!(copy.lines, source.lines);
        assert_eq!(copy.totals, source.totals);
        assert_eq!(copy.quote_date, date("2026-03-01"));
        assert_eq!(copy.valid_until, date("2026-03-31"));
        assert_eq!(copy.quote_number.as_ref().map(|n| n.0.as_str()), Some("Q-2026-0002"));

        let history = engine.history(&copy.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].comment, "duplicated from Q-2026-0001");
    }

    #[tokio::test]
    async fn revise_draft_recomputes_totals_and_locks_after_send() {
        let (engine, _, _) = engine();
        let quote = engine.create(new_quote(), None).await.unwrap();
        let revision = QuoteRevision {
            lines: vec![line("Consulting", 3, 100, 20)],
            discount: Discount::Fixed(Decimal::from(50)),
            shipping: Decimal::from(15),
            valid_until: Some(date("2026-01-31")),
        };

        let revised = engine.revise_draft(&quote.id, revision.clone()).await.unwrap();
        assert_eq!(revised.totals.subtotal, Decimal::from(300));
        assert_eq!(revised.totals.discount_total, Decimal::from(50));
        assert_eq!(revised.totals.tax_total, Decimal::from(50));
        assert_eq!(revised.totals.gross, Decimal::from(315));
        assert_eq!(engine.load(&quote.id).await.unwrap(), revised);

        engine.apply(&quote.id, TransitionRequest::new(QuoteStatus::Sent)).await.unwrap();
        let error = engine.revise_draft(&quote.id, revision).await.unwrap_err();
        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::QuoteLocked { status: QuoteStatus::Sent })
        );
    }

    #[tokio::test]
    async fn unknown_quote_is_not_found() {
        let (engine, _, _) = engine();
        let missing = QuoteId("missing".to_string());

        let error =
            engine.apply(&missing, TransitionRequest::new(QuoteStatus::Sent)).await.unwrap_err();
        assert_eq!(error, ApplicationError::NotFound(missing.clone()));
        assert!(engine.store().load_quote(&missing).await.unwrap().is_none());
    }
}

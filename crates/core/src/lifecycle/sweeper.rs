use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::domain::quote::{CompanyId, QuoteId, QuoteStatus};
use crate::errors::ApplicationError;
use crate::lifecycle::engine::{default_comment, TransitionEngine, TransitionRequest};
use crate::lifecycle::store::{ExpiryCriteria, ExpiryPolicy, QuoteStore};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub quote_id: QuoteId,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired_count: usize,
    pub errors: Vec<SweepFailure>,
}

/// Moves stale open quotes to `Expired` through the transition engine.
///
/// Candidates are processed one by one and each transition commits on its own,
/// so a failing quote never holds back the rest of the batch.
pub struct ExpirationSweeper<S, C> {
    engine: Arc<TransitionEngine<S, C>>,
}

impl<S, C> ExpirationSweeper<S, C>
where
    S: QuoteStore,
    C: Clock,
{
    pub fn new(engine: Arc<TransitionEngine<S, C>>) -> Self {
        Self { engine }
    }

    pub async fn sweep(
        &self,
        as_of: NaiveDate,
        scope: Option<CompanyId>,
        policy: ExpiryPolicy,
    ) -> Result<SweepReport, ApplicationError> {
        let criteria = ExpiryCriteria { as_of, company_id: scope, policy };
        let candidates = self.engine.store().expiry_candidates(&criteria).await?;

        let mut report = SweepReport { scanned: candidates.len(), ..SweepReport::default() };
        for quote in candidates {
            let request = TransitionRequest::new(QuoteStatus::Expired)
                .because(default_comment(QuoteStatus::Expired));
            match self.engine.apply(&quote.id, request).await {
                Ok(outcome) if outcome.is_applied() => report.expired_count += 1,
                Ok(_) => {}
                Err(error) => {
                    warn!(
                        event_name = "lifecycle.sweep.quote_failed",
                        quote_id = %quote.id,
                        error = %error,
                        "quote could not be expired"
                    );
                    let failure = SweepFailure { quote_id: quote.id, error: error.to_string() };
                    report.errors.push(failure);
                }
            }
        }

        info!(
            event_name = "lifecycle.sweep.completed",
            as_of = %as_of,
            company_id = criteria.company_id.as_ref().map(|id| id.0.as_str()).unwrap_or("all"),
            policy = ?criteria.policy,
            scanned = report.scanned,
            expired = report.expired_count,
            failed = report.errors.len(),
            "expiration sweep completed"
        );
        Ok(report)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quote::{ActorId, QuoteId, QuoteStatus};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryEntryId(pub String);

/// One row of a quote's status audit trail. Rows are appended once per status
/// entered and never edited afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteStatusHistory {
    pub id: HistoryEntryId,
    pub quote_id: QuoteId,
    pub status: QuoteStatus,
    pub comment: String,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

impl QuoteStatusHistory {
    pub fn record(
        quote_id: QuoteId,
        status: QuoteStatus,
        comment: impl Into<String>,
        actor: Option<ActorId>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HistoryEntryId(Uuid::new_v4().to_string()),
            quote_id,
            status,
            comment: comment.into(),
            actor,
            occurred_at,
        }
    }
}

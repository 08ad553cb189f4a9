use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::quote::{ActorId, Quote, QuoteStatus};

/// Published after a transition has been committed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteStatusChanged {
    pub quote: Quote,
    pub from: QuoteStatus,
    pub to: QuoteStatus,
    pub reason: Option<String>,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

impl QuoteStatusChanged {
    pub fn actor_label(&self) -> &str {
        self.actor.as_ref().map(|actor| actor.0.as_str()).unwrap_or("system")
    }
}

/// Receives committed status changes. Implementations must not block and
/// cannot fail the transition that produced the event.
pub trait StatusEventSink: Send + Sync {
    fn publish(&self, event: QuoteStatusChanged);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventSink;

impl StatusEventSink for NoopEventSink {
    fn publish(&self, _event: QuoteStatusChanged) {}
}

#[derive(Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<QuoteStatusChanged>>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<QuoteStatusChanged> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl StatusEventSink for RecordingEventSink {
    fn publish(&self, event: QuoteStatusChanged) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

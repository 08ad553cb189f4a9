use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::quote::{Quote, QuoteStatus};
use crate::errors::SideEffectError;
use crate::lifecycle::events::{QuoteStatusChanged, StatusEventSink};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PdfFormat {
    Pdf,
    /// Rendered markup kept when no PDF converter is installed.
    Html,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdfArtifact {
    pub path: PathBuf,
    pub bytes: usize,
    pub format: PdfFormat,
}

#[async_trait]
pub trait PdfGenerator: Send + Sync {
    async fn generate_quote_pdf(&self, quote: &Quote) -> Result<PdfArtifact, SideEffectError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &QuoteStatusChanged) -> Result<(), SideEffectError>;
}

/// Used when PDF snapshots are turned off.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledPdfGenerator;

#[async_trait]
impl PdfGenerator for DisabledPdfGenerator {
    async fn generate_quote_pdf(&self, _quote: &Quote) -> Result<PdfArtifact, SideEffectError> {
        Err(SideEffectError::Pdf("pdf generation is disabled".to_string()))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: &QuoteStatusChanged) -> Result<(), SideEffectError> {
        Ok(())
    }
}

fn regenerates_pdf(status: QuoteStatus) -> bool {
    matches!(status, QuoteStatus::Sent | QuoteStatus::Accepted)
}

fn is_audited(status: QuoteStatus) -> bool {
    matches!(
        status,
        QuoteStatus::Sent | QuoteStatus::Accepted | QuoteStatus::Rejected | QuoteStatus::Expired
    )
}

/// Post-commit work for status changes. Nothing here can undo or fail the
/// transition that triggered it, so every failure ends as a warning.
pub struct SideEffectDispatcher {
    pdf: Arc<dyn PdfGenerator>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
}

impl SideEffectDispatcher {
    pub fn new(
        pdf: Arc<dyn PdfGenerator>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { pdf, notifier, audit }
    }

    pub async fn on_status_changed(&self, event: &QuoteStatusChanged) {
        let quote = &event.quote;

        if regenerates_pdf(event.to) {
            match self.pdf.generate_quote_pdf(quote).await {
                Ok(artifact) => debug!(
                    event_name = "dispatch.pdf.generated",
                    quote_id = %quote.id,
                    path = %artifact.path.display(),
                    bytes = artifact.bytes,
                    format = ?artifact.format,
                    "quote snapshot regenerated"
                ),
                Err(error) => warn!(
                    event_name = "dispatch.pdf.failed",
                    quote_id = %quote.id,
                    status = %event.to,
                    error = %error,
                    "quote snapshot could not be regenerated"
                ),
            }
        }

        if is_audited(event.to) {
            let mut audit = AuditEvent::new(
                Some(quote.id.clone()),
                quote.id.to_string(),
                "quote.status_changed",
                AuditCategory::Lifecycle,
                event.actor_label(),
                AuditOutcome::Success,
            )
            .with_metadata("from", event.from.as_str())
            .with_metadata("to", event.to.as_str())
            .with_metadata("company_id", quote.company_id.0.clone())
            .occurred_at(event.occurred_at);
            if let Some(reason) = &event.reason {
                audit = audit.with_metadata("reason", reason.clone());
            }
            self.audit.emit(audit);
        }

        if event.to == QuoteStatus::Sent {
            if let Err(error) = self.notifier.notify(event).await {
                warn!(
                    event_name = "dispatch.notify.failed",
                    quote_id = %quote.id,
                    error = %error,
                    "client notification failed"
                );
            }
        }
    }

    /// Runs the dispatcher on its own task behind a bounded queue.
    pub fn spawn(self, capacity: usize) -> (DispatchHandle, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<QuoteStatusChanged>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                self.on_status_changed(&event).await;
            }
            info!(event_name = "dispatch.worker.stopped", "side-effect dispatcher stopped");
        });
        (DispatchHandle { sender }, worker)
    }
}

/// Engine-facing end of a spawned dispatcher. Never blocks the caller.
#[derive(Clone, Debug)]
pub struct DispatchHandle {
    sender: mpsc::Sender<QuoteStatusChanged>,
}

impl StatusEventSink for DispatchHandle {
    fn publish(&self, event: QuoteStatusChanged) {
        if let Err(error) = self.sender.try_send(event) {
            let (reason, event) = match error {
                mpsc::error::TrySendError::Full(event) => ("queue full", event),
                mpsc::error::TrySendError::Closed(event) => ("dispatcher stopped", event),
            };
            warn!(
                event_name = "dispatch.event.dropped",
                quote_id = %event.quote.id,
                to = %event.to,
                reason,
                "status change side effects skipped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};
    use rust_decimal::Decimal;

    use crate::audit::InMemoryAuditSink;
    use crate::domain::quote::{ClientId, CompanyId, Discount, Quote, QuoteId, QuoteStatus};
    use crate::errors::SideEffectError;
    use crate::lifecycle::events::{QuoteStatusChanged, StatusEventSink};
    use crate::totals::Totals;

    use super::{Notifier, PdfArtifact, PdfFormat, PdfGenerator, SideEffectDispatcher};

    #[derive(Default)]
    struct FakePdf {
        fail: bool,
        calls: Mutex<Vec<QuoteStatus>>,
    }

    #[async_trait]
    impl PdfGenerator for FakePdf {
        async fn generate_quote_pdf(&self, quote: &Quote) -> Result<PdfArtifact, SideEffectError> {
            self.calls.lock().expect("lock").push(quote.status);
            if self.fail {
                return Err(SideEffectError::Pdf("renderer crashed".to_string()));
            }
            Ok(PdfArtifact { path: PathBuf::from("out/q.pdf"), bytes: 42, format: PdfFormat::Pdf })
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        fail: bool,
        sent: Mutex<Vec<QuoteId>>,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn notify(&self, event: &QuoteStatusChanged) -> Result<(), SideEffectError> {
            self.sent.lock().expect("lock").push(event.quote.id.clone());
            if self.fail {
                return Err(SideEffectError::Notification("webhook returned 502".to_string()));
            }
            Ok(())
        }
    }

    fn changed(from: QuoteStatus, to: QuoteStatus) -> QuoteStatusChanged {
        let at = DateTime::parse_from_rfc3339("2026-04-01T10:00:00Z")
            .expect("valid rfc3339")
            .with_timezone(&Utc);
        let day = NaiveDate::from_ymd_opt(2026, 4, 1).expect("valid date");
        QuoteStatusChanged {
            quote: Quote {
                id: QuoteId("quote-1".to_string()),
                quote_number: None,
                company_id: CompanyId("acme".to_string()),
                client_id: ClientId("client-1".to_string()),
                status: to,
                quote_date: day,
                valid_until: day,
                sent_at: Some(at),
                lines: Vec::new(),
                discount: Discount::None,
                shipping: Decimal::ZERO,
                totals: Totals::default(),
                created_at: at,
                updated_at: at,
            },
            from,
            to,
            reason: None,
            actor: None,
            occurred_at: at,
        }
    }

    fn dispatcher(
        pdf: &Arc<FakePdf>,
        notifier: &Arc<FakeNotifier>,
        audit: &InMemoryAuditSink,
    ) -> SideEffectDispatcher {
        SideEffectDispatcher::new(pdf.clone(), notifier.clone(), Arc::new(audit.clone()))
    }

    #[tokio::test]
    async fn sent_regenerates_pdf_audits_and_notifies() {
        let pdf = Arc::new(FakePdf::default());
        let notifier = Arc::new(FakeNotifier::default());
        let audit = InMemoryAuditSink::default();

        dispatcher(&pdf, &notifier, &audit)
            .on_status_changed(&changed(QuoteStatus::Draft, QuoteStatus::Sent))
            .await;

        assert_eq!(*pdf.calls.lock().expect("lock"), vec![QuoteStatus::Sent]);
        assert_eq!(notifier.sent.lock().expect("lock").len(), 1);
        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, "system");
        assert_eq!(events[0].metadata.get("from").map(String::as_str), Some("draft"));
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("sent"));
    }

    #[tokio::test]
    async fn side_effects_follow_target_status() {
        let pdf = Arc::new(FakePdf::default());
        let notifier = Arc::new(FakeNotifier::default());
        let audit = InMemoryAuditSink::default();
        let dispatcher = dispatcher(&pdf, &notifier, &audit);

        for (from, to) in [
            (QuoteStatus::Sent, QuoteStatus::Pending),
            (QuoteStatus::Pending, QuoteStatus::Accepted),
            (QuoteStatus::Sent, QuoteStatus::Rejected),
            (QuoteStatus::Sent, QuoteStatus::Expired),
            (QuoteStatus::Draft, QuoteStatus::Cancelled),
        ] {
            dispatcher.on_status_changed(&changed(from, to)).await;
        }

        assert_eq!(*pdf.calls.lock().expect("lock"), vec![QuoteStatus::Accepted]);
        assert!(notifier.sent.lock().expect("lock").is_empty());
        let audited: Vec<_> = audit
            .events()
            .iter()
            .filter_map(|event| event.metadata.get("to").cloned())
            .collect();
        assert_eq!(audited, vec!["accepted", "rejected", "expired"]);
    }

    #[tokio::test]
    async fn failures_are_swallowed_and_remaining_effects_still_run() {
        let pdf = Arc::new(FakePdf { fail: true, ..FakePdf::default() });
        let notifier = Arc::new(FakeNotifier { fail: true, ..FakeNotifier::default() });
        let audit = InMemoryAuditSink::default();

        dispatcher(&pdf, &notifier, &audit)
            .on_status_changed(&changed(QuoteStatus::Draft, QuoteStatus::Sent))
            .await;

        assert_eq!(pdf.calls.lock().expect("lock").len(), 1);
        assert_eq!(audit.events().len(), 1);
        assert_eq!(notifier.sent.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn spawned_worker_drains_queue_until_handles_drop() {
        let pdf = Arc::new(FakePdf::default());
        let notifier = Arc::new(FakeNotifier::default());
        let audit = InMemoryAuditSink::default();

        let (handle, worker) = dispatcher(&pdf, &notifier, &audit).spawn(8);
        handle.publish(changed(QuoteStatus::Draft, QuoteStatus::Sent));
        handle.publish(changed(QuoteStatus::Sent, QuoteStatus::Accepted));
        drop(handle);
        worker.await.expect("worker exits cleanly");

        assert_eq!(
            *pdf.calls.lock().expect("lock"),
            vec![QuoteStatus::Sent, QuoteStatus::Accepted]
        );
        assert_eq!(audit.events().len(), 2);
    }

    #[tokio::test]
    async fn full_queue_drops_events_without_blocking() {
        let pdf = Arc::new(FakePdf::default());
        let notifier = Arc::new(FakeNotifier::default());
        let audit = InMemoryAuditSink::default();

        let (handle, worker) = dispatcher(&pdf, &notifier, &audit).spawn(1);
        // The current-thread runtime has not polled the worker yet.
        handle.publish(changed(QuoteStatus::Draft, QuoteStatus::Sent));
        handle.publish(changed(QuoteStatus::Sent, QuoteStatus::Accepted));
        drop(handle);
        worker.await.expect("worker exits cleanly");

        assert_eq!(audit.events().len(), 1);
    }
}

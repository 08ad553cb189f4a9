pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod policy;
pub mod store;
pub mod sweeper;

pub use dispatcher::{
    DisabledPdfGenerator, DispatchHandle, NoopNotifier, Notifier, PdfArtifact, PdfFormat,
    PdfGenerator, SideEffectDispatcher,
};
pub use engine::{
    default_comment, LifecycleSettings, TransitionEngine, TransitionOutcome, TransitionRequest,
};
pub use events::{NoopEventSink, QuoteStatusChanged, RecordingEventSink, StatusEventSink};
pub use policy::{allowed_next, can_transition, check_transition};
pub use store::{ExpiryCriteria, ExpiryPolicy, InMemoryQuoteStore, QuoteStore};
pub use sweeper::{ExpirationSweeper, SweepFailure, SweepReport};

pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod totals;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::history::QuoteStatusHistory;
pub use domain::product::ProductId;
pub use domain::quote::{
    ActorId, ClientId, CompanyId, Discount, NewQuote, Quote, QuoteId, QuoteLine, QuoteNumber,
    QuoteRevision, QuoteStatus,
};
pub use errors::{ApplicationError, DomainError, InterfaceError, SideEffectError, StoreError};
pub use lifecycle::{
    ExpirationSweeper, ExpiryPolicy, SideEffectDispatcher, SweepReport, TransitionEngine,
    TransitionOutcome, TransitionRequest,
};
pub use totals::{compute_totals, Totals};

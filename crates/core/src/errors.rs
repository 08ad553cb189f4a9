use thiserror::Error;

use crate::domain::quote::{QuoteId, QuoteNumber, QuoteStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid quote transition from {from} to {to} (allowed: {})", render_allowed(.allowed))]
    InvalidTransition { from: QuoteStatus, to: QuoteStatus, allowed: Vec<QuoteStatus> },
    #[error("quote is locked for editing while {status}")]
    QuoteLocked { status: QuoteStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("quote not found: {0}")]
    NotFound(QuoteId),
    #[error("quote {quote_id} was modified concurrently")]
    ConcurrentModification { quote_id: QuoteId },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Conflicts and store failures are safe to retry with fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. } | Self::Persistence(_))
    }
}

/// Failure reported by a persistence backend.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("quote not found: {0}")]
    NotFound(QuoteId),
    #[error("quote {quote_id} is no longer {expected}")]
    StatusMismatch { quote_id: QuoteId, expected: QuoteStatus },
    #[error("quote number {0} is already in use")]
    DuplicateNumber(QuoteNumber),
    #[error("{0}")]
    Backend(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::StatusMismatch { quote_id, .. } => {
                Self::ConcurrentModification { quote_id }
            }
            StoreError::DuplicateNumber(number) => Self::Domain(DomainError::InvariantViolation(
                format!("quote number {number} is already in use"),
            )),
            StoreError::Backend(message) => Self::Persistence(message),
        }
    }
}

/// Failure of a post-commit side effect. Only ever logged.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SideEffectError {
    #[error("pdf generation failed: {0}")]
    Pdf(String),
    #[error("notification failed: {0}")]
    Notification(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unprocessable request: {message}")]
    Unprocessable { message: String, allowed_next: Vec<QuoteStatus>, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unprocessable { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => {
                "The quote was changed by someone else. Reload it and try again."
            }
            Self::NotFound { .. } => "The requested quote does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Unprocessable { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::InvalidTransition { from, to, allowed }) => {
                Self::Unprocessable {
                    message: format!("cannot move quote from {from} to {to}"),
                    allowed_next: allowed,
                    correlation_id,
                }
            }
            ApplicationError::Domain(error) => Self::Unprocessable {
                message: error.to_string(),
                allowed_next: Vec::new(),
                correlation_id,
            },
            ApplicationError::NotFound(id) => {
                Self::NotFound { message: format!("quote {id}"), correlation_id }
            }
            ApplicationError::ConcurrentModification { quote_id } => Self::Conflict {
                message: format!("quote {quote_id} changed while the request was in flight"),
                correlation_id,
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

fn render_allowed(allowed: &[QuoteStatus]) -> String {
    if allowed.is_empty() {
        return "none".to_string();
    }
    allowed.iter().map(QuoteStatus::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use crate::domain::quote::{QuoteId, QuoteStatus};
    use crate::errors::{ApplicationError, DomainError, InterfaceError, StoreError};

    #[test]
    fn invalid_transition_maps_to_unprocessable_with_allowed_states() {
        let interface = ApplicationError::from(DomainError::InvalidTransition {
            from: QuoteStatus::Draft,
            to: QuoteStatus::Accepted,
            allowed: vec![QuoteStatus::Sent, QuoteStatus::Cancelled],
        })
        .into_interface("req-1");

        match interface {
            InterfaceError::Unprocessable { ref allowed_next, ref correlation_id, .. } => {
                assert_eq!(allowed_next, &vec![QuoteStatus::Sent, QuoteStatus::Cancelled]);
                assert_eq!(correlation_id, "req-1");
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn invalid_transition_message_lists_allowed_states() {
        let message = DomainError::InvalidTransition {
            from: QuoteStatus::Accepted,
            to: QuoteStatus::Cancelled,
            allowed: Vec::new(),
        }
        .to_string();

        assert_eq!(message, "invalid quote transition from accepted to cancelled (allowed: none)");
    }

    #[test]
    fn status_mismatch_becomes_retryable_conflict() {
        let error = ApplicationError::from(StoreError::StatusMismatch {
            quote_id: QuoteId("q-1".to_owned()),
            expected: QuoteStatus::Sent,
        });

        assert!(matches!(error, ApplicationError::ConcurrentModification { .. }));
        assert!(error.is_retryable());
        let interface = error.into_interface("req-2");
        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn domain_errors_are_never_retryable() {
        let error = ApplicationError::from(DomainError::QuoteLocked { status: QuoteStatus::Sent });
        assert!(!error.is_retryable());
        assert!(matches!(error.into_interface("req-4"), InterfaceError::Unprocessable { .. }));
    }
}

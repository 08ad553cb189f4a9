use crate::domain::quote::QuoteStatus;
use crate::errors::DomainError;

/// Statuses reachable in one step from `from`. Terminal statuses have none and
/// nothing leads back to `Draft`.
pub fn allowed_next(from: QuoteStatus) -> &'static [QuoteStatus] {
    use QuoteStatus::{Accepted, Cancelled, Draft, Expired, Pending, Rejected, Sent};

    match from {
        Draft => &[Sent, Cancelled],
        Sent => &[Pending, Accepted, Rejected, Expired, Cancelled],
        Pending => &[Accepted, Rejected, Expired, Cancelled],
        Accepted | Rejected | Expired | Cancelled => &[],
    }
}

pub fn can_transition(from: QuoteStatus, to: QuoteStatus) -> bool {
    allowed_next(from).contains(&to)
}

pub fn check_transition(from: QuoteStatus, to: QuoteStatus) -> Result<(), DomainError> {
    if can_transition(from, to) {
        return Ok(());
    }

    Err(DomainError::InvalidTransition { from, to, allowed: allowed_next(from).to_vec() })
}

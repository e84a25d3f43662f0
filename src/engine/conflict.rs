use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// True when `candidate` collides with `existing`. Boundaries are inclusive:
/// a booking that ends at the very instant another starts still collides.
pub fn conflicts(candidate: &Span, existing: &Span) -> bool {
    existing.conflicts_with(candidate)
}

/// First booking in `existing` that collides with `candidate`, in slice order.
/// Callers pass bookings in ascending id order so the reported conflict is stable.
pub fn find_conflict<'a>(candidate: &Span, existing: &'a [Booking]) -> Option<&'a Booking> {
    existing.iter().find(|b| conflicts(candidate, &b.span()))
}

pub(crate) fn validate_span(since: Ts, until: Ts) -> Result<Span, EngineError> {
    if since > until {
        return Err(EngineError::InvalidSpan { since, until });
    }
    Ok(Span::new(since, until))
}

pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::LimitExceeded("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_text(field: Option<&String>) -> Result<(), EngineError> {
    if field.is_some_and(|s| s.len() > MAX_TEXT_LEN) {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}

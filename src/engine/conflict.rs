use crate::config::Policy;
use crate::limits::*;
use crate::model::*;

use super::EngineError;
use super::hours::within_operating_hours;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Invalid("start must be before end".into()));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Build a span from caller-supplied bounds.
pub(crate) fn checked_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = Span { start, end };
    validate_span(&span)?;
    Ok(span)
}

/// Any showing or non-cancelled event on the room timeline overlapping `span`.
pub(crate) fn check_no_conflict(room: &RoomState, span: &Span) -> Result<(), EngineError> {
    match room.overlapping(span).next() {
        Some(interval) => Err(EngineError::Conflict(interval.id)),
        None => Ok(()),
    }
}

pub(crate) fn check_advance_notice(policy: &Policy, now: Ms, start: Ms) -> Result<(), EngineError> {
    let earliest = now + policy.min_advance_ms();
    if start < earliest {
        return Err(EngineError::TooSoon { earliest });
    }
    Ok(())
}

pub(crate) fn check_operating_hours(policy: &Policy, span: &Span) -> Result<(), EngineError> {
    if !within_operating_hours(policy, span) {
        return Err(EngineError::OutOfHours(*span));
    }
    Ok(())
}

pub(crate) fn check_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

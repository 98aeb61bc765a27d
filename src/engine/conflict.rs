use crate::limits::*;
use crate::model::*;

use super::{ConflictReason, EngineError};

/// Check an appointment or block window before anything is looked up.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = Span::try_new(start, end).ok_or(EngineError::InvalidArgument("end must be after start"))?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// Check a slot query. Returns the window and the step in millis.
pub(crate) fn validate_query(from: Ms, to: Ms, step_minutes: i64) -> Result<(Span, Ms), EngineError> {
    let window = validate_window(from, to)?;
    if step_minutes <= 0 {
        return Err(EngineError::InvalidArgument("step must be positive"));
    }
    let step = step_minutes
        .checked_mul(MINUTE_MS)
        .ok_or(EngineError::LimitExceeded("step too large"))?;
    Ok((window, step))
}

/// Check a listing window; wider than a single span may be but still bounded.
pub(crate) fn validate_window(from: Ms, to: Ms) -> Result<Span, EngineError> {
    let window = Span::try_new(from, to).ok_or(EngineError::InvalidArgument("from must be before to"))?;
    if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(window)
}

pub(crate) fn check_len(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

/// Non-cancelled appointments in `existing` that overlap `window`.
pub fn active_overlaps(existing: &[Appointment], window: &Span) -> usize {
    existing
        .iter()
        .filter(|a| a.is_active() && a.span.overlaps(window))
        .count()
}

/// Admit one more booking only while fewer than `max_concurrent` already overlap.
pub(crate) fn check_capacity(active: usize, max_concurrent: usize) -> Result<(), EngineError> {
    if active >= max_concurrent {
        return Err(EngineError::Conflict(ConflictReason::OverbookingLimit));
    }
    Ok(())
}

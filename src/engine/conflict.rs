use ulid::Ulid;

use crate::limits::MAX_APPOINTMENTS_PER_STAFF_DAY;
use crate::model::*;

use super::store::StaffDay;
use super::EngineError;

/// First active appointment on `day` overlapping `span`, ignoring `exclude`.
///
/// Only active appointments are stored on a staff-day, so cancelled, completed
/// and no-show appointments can never be returned.
pub(crate) fn find_conflict(day: &StaffDay, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
    day.overlapping(span)
        .find(|b| Some(b.appointment_id) != exclude)
        .map(|b| b.appointment_id)
}

/// Authoritative check; must run with the staff-day write lock held.
pub(crate) fn check_no_conflict(day: &StaffDay, span: &Span, exclude: Option<Ulid>) -> Result<(), EngineError> {
    if let Some(id) = find_conflict(day, span, exclude) {
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        tracing::debug!("staff {} on {}: {span} conflicts with {id}", day.staff_id, day.date);
        return Err(EngineError::Conflict(id));
    }
    if day.booked.len() >= MAX_APPOINTMENTS_PER_STAFF_DAY {
        return Err(EngineError::LimitExceeded("too many appointments for staff member on this day"));
    }
    Ok(())
}

/// Whether any of the sorted `busy` spans overlaps `span`.
pub(crate) fn is_busy(busy: &[Span], span: &Span) -> bool {
    let right_bound = busy.partition_point(|b| b.start < span.end);
    busy[..right_bound].iter().any(|b| b.end > span.start)
}

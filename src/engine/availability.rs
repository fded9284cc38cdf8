use ulid::Ulid;

use crate::model::*;

use super::conflict::is_busy;

// ── Slot Algorithm ────────────────────────────────────────────────

/// Bookable start times for one day.
///
/// Each window is scanned from `open` in `slot_duration` steps; a start is kept
/// only while both one slot and the whole booking (`total_duration`, buffer
/// included) end by `close`. Windows are scanned independently and the result
/// is chronological.
pub fn slot_starts(windows: &[TimeWindow], slot_duration: Minutes, total_duration: Minutes) -> Vec<Minutes> {
    if slot_duration <= 0 || total_duration <= 0 {
        return Vec::new();
    }
    let needed = slot_duration.max(total_duration);
    let mut starts = Vec::new();
    for window in windows {
        let mut t = window.open;
        while t + needed <= window.close {
            starts.push(t);
            t += slot_duration;
        }
    }
    starts.sort_unstable();
    starts.dedup();
    starts
}

/// Pure slot evaluation over per-staff snapshots of busy spans.
///
/// `candidates` holds `(staff_id, sorted busy spans)` for every staff member able
/// to perform all requested services. A slot is available when at least one
/// candidate is free for `[start, start + total_duration)`.
pub fn compute_slots(
    windows: &[TimeWindow],
    slot_duration: Minutes,
    total_duration: Minutes,
    candidates: &[(Ulid, Vec<Span>)],
) -> Vec<Slot> {
    slot_starts(windows, slot_duration, total_duration)
        .into_iter()
        .map(|start| {
            let wanted = Span::new(start, start + total_duration);
            let staff_available: Vec<Ulid> = candidates
                .iter()
                .filter(|(_, busy)| !is_busy(busy, &wanted))
                .map(|(id, _)| *id)
                .collect();
            Slot {
                time: start,
                available: !staff_available.is_empty(),
                staff_available,
            }
        })
        .collect()
}

/// Whether `span` sits entirely inside one of `windows`.
pub fn within_hours(windows: &[TimeWindow], span: &Span) -> bool {
    windows.iter().any(|w| w.span().contains_span(span))
}

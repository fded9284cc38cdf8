use std::str::FromStr;

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: appointments committed. Labels: assignment.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotwise_bookings_created_total";

/// Counter: create/reschedule attempts rejected by the conflict check.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotwise_booking_conflicts_total";

/// Counter: appointments cancelled. Labels: penalty.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "slotwise_bookings_cancelled_total";

/// Counter: appointments moved to a new time.
pub const BOOKINGS_RESCHEDULED_TOTAL: &str = "slotwise_bookings_rescheduled_total";

/// Counter: business-side status transitions. Labels: status.
pub const STATUS_TRANSITIONS_TOTAL: &str = "slotwise_status_transitions_total";

/// Counter: promotion codes redeemed on committed appointments.
pub const PROMOTIONS_REDEEMED_TOTAL: &str = "slotwise_promotions_redeemed_total";

/// Counter: failed notification/payment side effects. Labels: effect.
pub const SIDE_EFFECT_FAILURES_TOTAL: &str = "slotwise_side_effect_failures_total";

/// Histogram: availability query latency in seconds.
pub const AVAILABILITY_DURATION_SECONDS: &str = "slotwise_availability_duration_seconds";

// ── Storage ─────────────────────────────────────────────────────

/// Gauge: number of loaded business engines.
pub const TENANTS_ACTIVE: &str = "slotwise_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

/// Install a fmt subscriber at `level` (e.g. "info"). Unknown levels fall back to info.
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(level: &str) {
    let level = tracing::Level::from_str(level).unwrap_or(tracing::Level::INFO);
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

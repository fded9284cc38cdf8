use chrono::{NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use crate::timegrid::{Minutes, Span};
use crate::timegrid::hhmm;

/// Integer minor currency units (cents). The only money type.
pub type Money = i64;

// ── Business calendar & policy ───────────────────────────────────

/// One open/close window within a day, e.g. a morning shift of a split day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(with = "hhmm")]
    pub open: Minutes,
    #[serde(with = "hhmm")]
    pub close: Minutes,
}

impl TimeWindow {
    pub fn span(&self) -> Span {
        Span::new(self.open, self.close)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub day: Weekday,
    pub is_open: bool,
    #[serde(default)]
    pub windows: Vec<TimeWindow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub days: Vec<DaySchedule>,
}

impl WeeklySchedule {
    /// Open windows for a weekday, sorted by opening time. Empty when closed.
    pub fn windows_for(&self, day: Weekday) -> Vec<TimeWindow> {
        let mut windows: Vec<TimeWindow> = self
            .days
            .iter()
            .filter(|d| d.day == day && d.is_open)
            .flat_map(|d| d.windows.iter().copied())
            .filter(|w| w.open < w.close)
            .collect();
        windows.sort_by_key(|w| w.open);
        windows
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositKind {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositPolicy {
    pub required: bool,
    pub kind: DepositKind,
    /// Percent of total for `Percentage`, minor units for `Fixed`.
    pub amount: Money,
}

impl DepositPolicy {
    pub fn none() -> Self {
        Self {
            required: false,
            kind: DepositKind::Fixed,
            amount: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationPolicy {
    pub allow_cancellation: bool,
    pub hours_before_appointment: i64,
    pub penalty_percentage: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfig {
    pub slot_duration: Minutes,
    pub buffer_time: Minutes,
    /// Earliest a booking may start, in minutes from now.
    pub min_advance_minutes: i64,
    /// Latest a booking may start, in days from now.
    pub max_advance_days: i64,
    pub requires_confirmation: bool,
    pub deposit: DepositPolicy,
    pub cancellation: CancellationPolicy,
    pub allow_reschedule: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
    pub id: Ulid,
    pub name: String,
    pub schedule: WeeklySchedule,
    pub booking: BookingConfig,
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub duration: Minutes,
    pub price: Money,
    /// Price after any standing service-level discount.
    pub final_price: Money,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: Ulid,
    pub name: String,
    pub service_ids: Vec<Ulid>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Staff {
    pub fn can_perform_all(&self, service_ids: &[Ulid]) -> bool {
        service_ids.iter().all(|s| self.service_ids.contains(s))
    }
}

fn default_true() -> bool {
    true
}

// ── Promotions ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionUsage {
    pub appointment_id: Ulid,
    pub client_id: Ulid,
    pub discount: Money,
    pub used_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: Ulid,
    pub code: String,
    pub kind: DiscountKind,
    /// Percent for `Percentage`, minor units for `Fixed`.
    pub value: Money,
    /// Cap on a percentage discount.
    pub max_discount_amount: Option<Money>,
    pub valid_from: NaiveDateTime,
    pub valid_until: NaiveDateTime,
    pub total_uses: Option<u32>,
    #[serde(default)]
    pub current_uses: u32,
    pub min_purchase: Option<Money>,
    /// When set, at least one requested service must be in this list.
    pub service_ids: Option<Vec<Ulid>>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub usages: Vec<PromotionUsage>,
}

impl Promotion {
    pub fn record_use(&mut self, usage: PromotionUsage) {
        self.current_uses += 1;
        self.usages.push(usage);
    }
}

/// Codes are unique per business and matched case-insensitively.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Active appointments hold their staff interval and can conflict.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending
                | AppointmentStatus::Confirmed
                | AppointmentStatus::CheckedIn
                | AppointmentStatus::InProgress
        )
    }

    /// Cancel, reschedule and no-show are only legal before the client arrives.
    pub fn is_open_booking(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::CheckedIn => "checked_in",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status-history entry. `Rescheduled` is a marker, never a resting status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Status(AppointmentStatus),
    Rescheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: HistoryStatus,
    pub changed_by: Ulid,
    pub changed_at: NaiveDateTime,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLine {
    pub service_id: Ulid,
    pub name: String,
    pub duration: Minutes,
    pub price: Money,
    /// Standing service-level discount (`price - final_price`).
    pub discount: Money,
}

impl ServiceLine {
    pub fn snapshot(service: &Service) -> Self {
        Self {
            service_id: service.id,
            name: service.name.clone(),
            duration: service.duration,
            price: service.price,
            discount: service.price - service.final_price,
        }
    }

    pub fn final_price(&self) -> Money {
        self.price - self.discount
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub subtotal: Money,
    pub discount: Money,
    pub promotion_id: Option<Ulid>,
    pub promotion_code: Option<String>,
    pub deposit: Money,
    pub deposit_paid: bool,
    pub deposit_charge: Option<String>,
    pub total: Money,
    pub tip: Money,
    pub final_total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub cancelled_at: NaiveDateTime,
    pub cancelled_by: Ulid,
    pub reason: Option<String>,
    pub refunded: bool,
    pub refund_amount: Money,
    pub penalty_amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffAssignment {
    Requested,
    /// Client had no preference; the core picked the first free staff member.
    Auto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub business_id: Ulid,
    pub client_id: Ulid,
    pub staff_id: Ulid,
    pub assignment: StaffAssignment,
    pub date: NaiveDate,
    /// `[start, end)` in minutes; `end` includes buffer time.
    pub span: Span,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub service_minutes: Minutes,
    pub buffer_minutes: Minutes,
    pub total_duration: Minutes,
    pub services: Vec<ServiceLine>,
    pub pricing: PricingSnapshot,
    pub status: AppointmentStatus,
    pub history: Vec<StatusChange>,
    pub cancellation: Option<CancellationRecord>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    /// Bumped on every committed change; stale writers are rejected.
    pub version: u64,
}

impl Appointment {
    pub fn service_ids(&self) -> Vec<Ulid> {
        self.services.iter().map(|s| s.service_id).collect()
    }
}

/// Where an appointment sat before a reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRef {
    pub date: NaiveDate,
    pub span: Span,
}

impl std::fmt::Display for SlotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.date, self.span)
    }
}

/// Promotion usage committed in the same record as the appointment it discounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    pub promotion_id: Ulid,
    pub code: String,
    pub usage: PromotionUsage,
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusinessConfigured {
        business: Business,
    },
    ServiceUpserted {
        service: Service,
    },
    StaffUpserted {
        staff: Staff,
    },
    PromotionUpserted {
        promotion: Promotion,
    },
    AppointmentCreated {
        appointment: Appointment,
        redemption: Option<Redemption>,
    },
    AppointmentRescheduled {
        id: Ulid,
        staff_id: Ulid,
        from: SlotRef,
        to: SlotRef,
        change: StatusChange,
    },
    AppointmentCancelled {
        id: Ulid,
        staff_id: Ulid,
        date: NaiveDate,
        record: CancellationRecord,
        change: StatusChange,
    },
    StatusChanged {
        id: Ulid,
        staff_id: Ulid,
        date: NaiveDate,
        status: AppointmentStatus,
        tip: Option<Money>,
        change: StatusChange,
    },
    DepositCaptured {
        id: Ulid,
        charge: String,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(with = "hhmm")]
    pub time: Minutes,
    pub available: bool,
    pub staff_available: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
    pub deposit: Money,
    pub promotion_id: Option<Ulid>,
    pub promotion_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    pub appointment: Appointment,
    pub refund_amount: Money,
    pub penalty_applied: bool,
}

/// Input of a booking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub business_id: Ulid,
    pub client_id: Ulid,
    /// `None` means no preference.
    pub staff_id: Option<Ulid>,
    pub service_ids: Vec<Ulid>,
    pub date: NaiveDate,
    /// `HH:MM`, business-local.
    pub start_time: String,
    pub discount_code: Option<String>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(open: Minutes, close: Minutes) -> TimeWindow {
        TimeWindow { open, close }
    }

    #[test]
    fn windows_for_sorts_and_skips_closed_days() {
        let schedule = WeeklySchedule {
            days: vec![
                DaySchedule {
                    day: Weekday::Mon,
                    is_open: true,
                    windows: vec![window(14 * 60, 18 * 60), window(9 * 60, 12 * 60)],
                },
                DaySchedule {
                    day: Weekday::Sun,
                    is_open: false,
                    windows: vec![window(9 * 60, 12 * 60)],
                },
            ],
        };
        let mon = schedule.windows_for(Weekday::Mon);
        assert_eq!(mon, vec![window(540, 720), window(840, 1080)]);
        assert!(schedule.windows_for(Weekday::Sun).is_empty());
        assert!(schedule.windows_for(Weekday::Tue).is_empty());
    }

    #[test]
    fn staff_capability_requires_every_service() {
        let (a, b, c) = (Ulid::new(), Ulid::new(), Ulid::new());
        let staff = Staff {
            id: Ulid::new(),
            name: "Ana".into(),
            service_ids: vec![a, b],
            active: true,
        };
        assert!(staff.can_perform_all(&[a]));
        assert!(staff.can_perform_all(&[a, b]));
        assert!(!staff.can_perform_all(&[a, c]));
    }

    #[test]
    fn status_classes() {
        use AppointmentStatus::*;
        for s in [Pending, Confirmed, CheckedIn, InProgress] {
            assert!(s.is_active(), "{s} should be active");
        }
        for s in [Completed, Cancelled, NoShow] {
            assert!(!s.is_active(), "{s} should not be active");
        }
        assert!(Pending.is_open_booking());
        assert!(!CheckedIn.is_open_booking());
    }

    #[test]
    fn codes_normalize() {
        assert_eq!(normalize_code("  save10 "), "SAVE10");
    }

    #[test]
    fn service_line_snapshot() {
        let service = Service {
            id: Ulid::new(),
            name: "Cut".into(),
            duration: 30,
            price: 5000,
            final_price: 4500,
            active: true,
        };
        let line = ServiceLine::snapshot(&service);
        assert_eq!(line.discount, 500);
        assert_eq!(line.final_price(), 4500);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::DepositCaptured {
            id: Ulid::new(),
            charge: "ch_123".into(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

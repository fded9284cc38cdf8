use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    BOOKINGS_CANCELLED_TOTAL, BOOKINGS_CREATED_TOTAL, BOOKINGS_RESCHEDULED_TOTAL, PROMOTIONS_REDEEMED_TOTAL,
    STATUS_TRANSITIONS_TOTAL,
};
use crate::timegrid::{MINUTES_PER_DAY, at, time_to_minutes};

use super::availability::within_hours;
use super::conflict::check_no_conflict;
use super::promotion::is_redeemable;
use super::store::{Locked, StaffDay};
use super::{Engine, EngineError, SharedPromotion, locked_days, pricing};

// ── Rules ────────────────────────────────────────────────────────

/// Legal status moves. Cancellation is listed but only `cancel_booking` takes it.
pub fn can_transition(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    use AppointmentStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Confirmed, CheckedIn)
            | (CheckedIn, InProgress)
            | (InProgress, Completed)
            | (Pending | Confirmed, Cancelled)
            | (Pending | Confirmed, NoShow)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundDecision {
    pub refund: Money,
    pub penalty: Money,
    /// The cancellation fell inside the policy's notice threshold.
    pub penalty_applied: bool,
}

/// Refund owed when cancelling at `now`, out of the quoted deposit. Whether the
/// charge was captured is the payment collaborator's concern, not the policy's.
pub fn refund_for(
    pricing: &PricingSnapshot,
    policy: &CancellationPolicy,
    start_at: NaiveDateTime,
    now: NaiveDateTime,
) -> RefundDecision {
    if !policy.allow_cancellation {
        return RefundDecision {
            refund: 0,
            penalty: 0,
            penalty_applied: false,
        };
    }
    let basis = pricing.deposit;
    let notice = start_at - now;
    let late = notice < Duration::hours(policy.hours_before_appointment);
    let penalty = if late { basis * policy.penalty_percentage / 100 } else { 0 };
    RefundDecision {
        refund: basis - penalty,
        penalty,
        penalty_applied: late,
    }
}

fn check_min_advance(config: &BookingConfig, start_at: NaiveDateTime, now: NaiveDateTime) -> Result<(), EngineError> {
    if start_at - now < Duration::minutes(config.min_advance_minutes) {
        return Err(EngineError::invalid(format!(
            "appointments must be booked at least {} minutes ahead",
            config.min_advance_minutes
        )));
    }
    Ok(())
}

fn check_advance_window(config: &BookingConfig, start_at: NaiveDateTime, now: NaiveDateTime) -> Result<(), EngineError> {
    check_min_advance(config, start_at, now)?;
    if start_at - now > Duration::days(config.max_advance_days) {
        return Err(EngineError::invalid(format!(
            "appointments can be booked at most {} days ahead",
            config.max_advance_days
        )));
    }
    Ok(())
}

/// `[start, start + total)` on `date`, inside the business's open hours.
fn bookable_span(business: &Business, date: NaiveDate, start: Minutes, total: Minutes) -> Result<Span, EngineError> {
    if start + total > MINUTES_PER_DAY {
        return Err(EngineError::invalid("appointment would run past midnight"));
    }
    let span = Span::new(start, start + total);
    let windows = business.schedule.windows_for(date.weekday());
    if windows.is_empty() {
        return Err(EngineError::invalid(format!("business is closed on {date}")));
    }
    if !within_hours(&windows, &span) {
        return Err(EngineError::invalid(format!("{span} is outside business hours on {date}")));
    }
    Ok(span)
}

fn check_text(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    if let Some(v) = value
        && v.len() > max
    {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

// ── Create ───────────────────────────────────────────────────────

/// Everything about a new appointment except the staff member, decided before
/// any lock is taken.
struct Draft {
    client_id: Ulid,
    date: NaiveDate,
    span: Span,
    service_minutes: Minutes,
    buffer_minutes: Minutes,
    lines: Vec<ServiceLine>,
    service_ids: Vec<Ulid>,
    status: AppointmentStatus,
    assignment: StaffAssignment,
    deposit: DepositPolicy,
    notes: Option<String>,
    now: NaiveDateTime,
    promotion: Option<(String, SharedPromotion)>,
}

impl Engine {
    /// Book an appointment.
    ///
    /// The conflict check, promotion redemption and WAL append happen under the
    /// staff-day write lock (and the promotion lock), so two requests for the
    /// same interval can never both commit. The deposit charge is awaited after
    /// the locks are released; notifications are spawned.
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Appointment, EngineError> {
        if request.business_id != self.business_id {
            return Err(EngineError::NotFound(request.business_id));
        }
        let business = self.require_business()?;
        check_text(request.notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;
        check_text(request.discount_code.as_deref(), MAX_CODE_LEN, "discount code too long")?;

        let lines = self.service_lines(&request.service_ids)?;
        let service_minutes: Minutes = lines.iter().map(|l| l.duration).sum();
        let buffer_minutes = business.booking.buffer_time;
        let start = time_to_minutes(&request.start_time)?;
        let span = bookable_span(&business, request.date, start, service_minutes + buffer_minutes)?;

        let now = self.now();
        check_advance_window(&business.booking, at(request.date, span.start), now)?;

        let (candidates, assignment) = match request.staff_id {
            Some(staff_id) => {
                let staff = self
                    .store
                    .staff_member(&staff_id)
                    .ok_or(EngineError::NotFound(staff_id))?;
                if !staff.active {
                    return Err(EngineError::invalid(format!("staff member {staff_id} is inactive")));
                }
                if !staff.can_perform_all(&request.service_ids) {
                    return Err(EngineError::invalid(format!(
                        "staff member {staff_id} cannot perform every requested service"
                    )));
                }
                (vec![staff_id], StaffAssignment::Requested)
            }
            None => {
                let ids: Vec<Ulid> = self
                    .store
                    .all_staff()
                    .into_iter()
                    .filter(|s| s.active && s.can_perform_all(&request.service_ids))
                    .map(|s| s.id)
                    .collect();
                if ids.is_empty() {
                    return Err(EngineError::invalid("no staff member performs every requested service"));
                }
                (ids, StaffAssignment::Auto)
            }
        };

        let promotion = match request
            .discount_code
            .as_deref()
            .map(normalize_code)
            .filter(|c| !c.is_empty())
        {
            Some(code) => {
                let Some(shared) = self.store.promotion(&code) else {
                    tracing::debug!("unknown promotion code {code}");
                    return Err(EngineError::InvalidPromotion);
                };
                Some((code, shared))
            }
            None => None,
        };

        let draft = Draft {
            client_id: request.client_id,
            date: request.date,
            span,
            service_minutes,
            buffer_minutes,
            lines,
            service_ids: request.service_ids,
            status: if business.booking.requires_confirmation {
                AppointmentStatus::Pending
            } else {
                AppointmentStatus::Confirmed
            },
            assignment,
            deposit: business.booking.deposit.clone(),
            notes: request.notes,
            now,
            promotion,
        };

        let gate = self.commit_gate.read().await;
        let mut first_err = None;
        let mut committed = None;
        for staff_id in candidates {
            let mut day = self.store.staff_day(staff_id, draft.date).write_owned().await;
            if let Err(e) = check_no_conflict(&day, &draft.span, None) {
                first_err.get_or_insert(e);
                continue;
            }
            committed = Some(self.commit_booking(&draft, &mut day).await?);
            break;
        }
        drop(gate);
        let Some(appointment) = committed else {
            return Err(first_err.unwrap_or_else(|| EngineError::invalid("no staff member available")));
        };

        metrics::counter!(
            BOOKINGS_CREATED_TOTAL,
            "assignment" => match appointment.assignment {
                StaffAssignment::Requested => "requested",
                StaffAssignment::Auto => "auto",
            }
        )
        .increment(1);
        tracing::info!(
            "appointment {} booked with staff {} on {} {} ({})",
            appointment.id,
            appointment.staff_id,
            appointment.date,
            appointment.span,
            appointment.status
        );

        let appointment = self.capture_deposit(appointment).await;
        self.after_create(&appointment);
        Ok(appointment)
    }

    /// Runs with `day` write-locked and the conflict check passed.
    async fn commit_booking(&self, draft: &Draft, day: &mut StaffDay) -> Result<Appointment, EngineError> {
        let mut promotion_guard = match &draft.promotion {
            Some((_, shared)) => Some(shared.clone().lock_owned().await),
            None => None,
        };
        let subtotal: Money = draft.lines.iter().map(ServiceLine::final_price).sum();
        if let (Some((code, _)), Some(promotion)) = (&draft.promotion, promotion_guard.as_deref())
            && (normalize_code(&promotion.code) != *code
                || !is_redeemable(promotion, subtotal, &draft.service_ids, draft.now))
        {
            tracing::debug!("promotion code {code} rejected");
            return Err(EngineError::InvalidPromotion);
        }

        let quote = pricing::quote(&draft.lines, promotion_guard.as_deref(), &draft.deposit);
        let id = Ulid::new();
        let appointment = Appointment {
            id,
            business_id: self.business_id,
            client_id: draft.client_id,
            staff_id: day.staff_id,
            assignment: draft.assignment,
            date: draft.date,
            span: draft.span,
            start_at: at(draft.date, draft.span.start),
            end_at: at(draft.date, draft.span.end),
            service_minutes: draft.service_minutes,
            buffer_minutes: draft.buffer_minutes,
            total_duration: draft.span.duration(),
            services: draft.lines.clone(),
            pricing: quote.snapshot(),
            status: draft.status,
            history: vec![StatusChange {
                status: HistoryStatus::Status(draft.status),
                changed_by: draft.client_id,
                changed_at: draft.now,
                reason: None,
            }],
            cancellation: None,
            notes: draft.notes.clone(),
            created_at: draft.now,
            version: 0,
        };
        let redemption = promotion_guard.as_deref().map(|p| Redemption {
            promotion_id: p.id,
            code: normalize_code(&p.code),
            usage: PromotionUsage {
                appointment_id: id,
                client_id: draft.client_id,
                discount: quote.discount,
                used_at: draft.now,
            },
        });
        let redeemed = redemption.is_some();

        let event = Event::AppointmentCreated {
            appointment: appointment.clone(),
            redemption,
        };
        let locked = Locked {
            days: vec![day],
            promotion: promotion_guard.as_deref_mut(),
        };
        self.persist_and_apply(&event, locked).await?;
        if redeemed {
            metrics::counter!(PROMOTIONS_REDEEMED_TOTAL).increment(1);
        }
        Ok(appointment)
    }

    // ── Cancel ───────────────────────────────────────────────────

    /// Cancel a pending or confirmed appointment and work out its refund.
    ///
    /// With `expected_version` set, the call fails with `Stale` if the
    /// appointment changed since the caller read it.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        cancelled_by: Ulid,
        reason: Option<String>,
        expected_version: Option<u64>,
    ) -> Result<CancelOutcome, EngineError> {
        check_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        let business = self.require_business()?;

        let gate = self.commit_gate.read().await;
        let (appointment, mut guards) = self.lock_appointment(id, None, expected_version).await?;
        if !appointment.status.is_open_booking() {
            return Err(EngineError::invalid(format!(
                "cannot cancel an appointment that is {}",
                appointment.status
            )));
        }
        let now = self.now();
        let decision = refund_for(
            &appointment.pricing,
            &business.booking.cancellation,
            appointment.start_at,
            now,
        );
        let event = Event::AppointmentCancelled {
            id,
            staff_id: appointment.staff_id,
            date: appointment.date,
            record: CancellationRecord {
                cancelled_at: now,
                cancelled_by,
                reason: reason.clone(),
                refunded: decision.refund > 0,
                refund_amount: decision.refund,
                penalty_amount: decision.penalty,
            },
            change: StatusChange {
                status: HistoryStatus::Status(AppointmentStatus::Cancelled),
                changed_by: cancelled_by,
                changed_at: now,
                reason,
            },
        };
        self.persist_and_apply(&event, locked_days(&mut guards)).await?;
        drop(guards);
        drop(gate);

        let appointment = self.store.appointment(&id).ok_or(EngineError::NotFound(id))?;
        metrics::counter!(
            BOOKINGS_CANCELLED_TOTAL,
            "penalty" => if decision.penalty_applied { "true" } else { "false" }
        )
        .increment(1);
        tracing::info!(
            "appointment {id} cancelled, refund {} penalty {}",
            decision.refund,
            decision.penalty
        );
        self.after_cancel(&appointment, decision.refund);
        Ok(CancelOutcome {
            appointment,
            refund_amount: decision.refund,
            penalty_applied: decision.penalty_applied,
        })
    }

    // ── Reschedule ───────────────────────────────────────────────

    /// Move an appointment to `new_date` at `new_start_time`, same staff member
    /// and same length (services plus buffer).
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        new_date: NaiveDate,
        new_start_time: &str,
        changed_by: Ulid,
        expected_version: Option<u64>,
    ) -> Result<Appointment, EngineError> {
        let business = self.require_business()?;
        if !business.booking.allow_reschedule {
            return Err(EngineError::invalid("business does not allow rescheduling"));
        }
        let start = time_to_minutes(new_start_time)?;

        let gate = self.commit_gate.read().await;
        let (appointment, mut guards) = self.lock_appointment(id, Some(new_date), expected_version).await?;
        if !appointment.status.is_open_booking() {
            return Err(EngineError::invalid(format!(
                "cannot reschedule an appointment that is {}",
                appointment.status
            )));
        }
        let span = bookable_span(&business, new_date, start, appointment.total_duration)?;
        let now = self.now();
        check_min_advance(&business.booking, at(new_date, span.start), now)?;

        let target = guards
            .iter()
            .find(|g| g.date == new_date)
            .ok_or_else(|| EngineError::WalError(format!("staff-day {new_date} not locked")))?;
        check_no_conflict(target, &span, Some(id))?;

        let from = SlotRef {
            date: appointment.date,
            span: appointment.span,
        };
        let to = SlotRef { date: new_date, span };
        let event = Event::AppointmentRescheduled {
            id,
            staff_id: appointment.staff_id,
            from,
            to,
            change: StatusChange {
                status: HistoryStatus::Rescheduled,
                changed_by,
                changed_at: now,
                reason: Some(format!("{from} -> {to}")),
            },
        };
        self.persist_and_apply(&event, locked_days(&mut guards)).await?;
        drop(guards);
        drop(gate);

        let appointment = self.store.appointment(&id).ok_or(EngineError::NotFound(id))?;
        metrics::counter!(BOOKINGS_RESCHEDULED_TOTAL).increment(1);
        tracing::info!("appointment {id} rescheduled from {from} to {to}");
        self.after_reschedule(&appointment, from);
        Ok(appointment)
    }

    // ── Business-side transitions ────────────────────────────────

    async fn transition(
        &self,
        id: Ulid,
        to: AppointmentStatus,
        changed_by: Ulid,
        reason: Option<String>,
        tip: Option<Money>,
    ) -> Result<Appointment, EngineError> {
        if to == AppointmentStatus::Cancelled {
            return Err(EngineError::invalid("appointments are cancelled through cancel_booking"));
        }
        check_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;

        let gate = self.commit_gate.read().await;
        let (appointment, mut guards) = self.lock_appointment(id, None, None).await?;
        if !can_transition(appointment.status, to) {
            return Err(EngineError::invalid(format!(
                "cannot move appointment from {} to {to}",
                appointment.status
            )));
        }
        let event = Event::StatusChanged {
            id,
            staff_id: appointment.staff_id,
            date: appointment.date,
            status: to,
            tip,
            change: StatusChange {
                status: HistoryStatus::Status(to),
                changed_by,
                changed_at: self.now(),
                reason,
            },
        };
        self.persist_and_apply(&event, locked_days(&mut guards)).await?;
        drop(guards);
        drop(gate);

        metrics::counter!(STATUS_TRANSITIONS_TOTAL, "status" => to.as_str()).increment(1);
        tracing::info!("appointment {id}: {} -> {to}", appointment.status);
        self.store.appointment(&id).ok_or(EngineError::NotFound(id))
    }

    pub async fn confirm(&self, id: Ulid, changed_by: Ulid) -> Result<Appointment, EngineError> {
        let appointment = self
            .transition(id, AppointmentStatus::Confirmed, changed_by, None, None)
            .await?;
        self.after_confirm(&appointment);
        Ok(appointment)
    }

    pub async fn check_in(&self, id: Ulid, changed_by: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::CheckedIn, changed_by, None, None)
            .await
    }

    pub async fn start_service(&self, id: Ulid, changed_by: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::InProgress, changed_by, None, None)
            .await
    }

    /// Finish the appointment; `final_total` becomes `total + tip`.
    pub async fn complete(&self, id: Ulid, changed_by: Ulid, tip: Money) -> Result<Appointment, EngineError> {
        if !(0..=MAX_TIP).contains(&tip) {
            return Err(EngineError::invalid(format!("tip must be between 0 and {MAX_TIP}")));
        }
        self.transition(id, AppointmentStatus::Completed, changed_by, None, Some(tip))
            .await
    }

    pub async fn mark_no_show(
        &self,
        id: Ulid,
        changed_by: Ulid,
        reason: Option<String>,
    ) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::NoShow, changed_by, reason, None)
            .await
    }
}

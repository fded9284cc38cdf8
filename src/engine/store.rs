use std::sync::{Arc, RwLock as StdRwLock};

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;

use super::{SharedPromotion, SharedStaffDay};

/// One active appointment's hold on a staff member's time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Booked {
    pub appointment_id: Ulid,
    pub span: Span,
}

/// Active appointment intervals for one staff member on one date; the unit of locking.
///
/// Only appointments whose status `is_active()` live here; terminal transitions remove them.
#[derive(Debug, Clone)]
pub struct StaffDay {
    pub staff_id: Ulid,
    pub date: NaiveDate,
    /// Sorted by `span.start`.
    pub booked: Vec<Booked>,
}

impl StaffDay {
    pub fn new(staff_id: Ulid, date: NaiveDate) -> Self {
        Self {
            staff_id,
            date,
            booked: Vec::new(),
        }
    }

    pub fn insert(&mut self, booked: Booked) {
        let pos = self
            .booked
            .binary_search_by_key(&booked.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.booked.insert(pos, booked);
    }

    pub fn remove(&mut self, appointment_id: Ulid) -> Option<Booked> {
        let pos = self.booked.iter().position(|b| b.appointment_id == appointment_id)?;
        Some(self.booked.remove(pos))
    }

    /// Entries overlapping `query`. Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booked> {
        let right_bound = self.booked.partition_point(|b| b.span.start < query.end);
        self.booked[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn spans(&self) -> Vec<Span> {
        self.booked.iter().map(|b| b.span).collect()
    }
}

/// State already locked by the caller, handed to `BookingStore::apply`.
#[derive(Default)]
pub(super) struct Locked<'a> {
    pub days: Vec<&'a mut StaffDay>,
    pub promotion: Option<&'a mut Promotion>,
}

impl<'a> Locked<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn day(day: &'a mut StaffDay) -> Self {
        Self {
            days: vec![day],
            promotion: None,
        }
    }

    fn day_for(&mut self, staff_id: Ulid, date: NaiveDate) -> Option<&mut StaffDay> {
        let found = self
            .days
            .iter_mut()
            .find(|d| d.staff_id == staff_id && d.date == date)
            .map(|d| &mut **d);
        if found.is_none() {
            tracing::error!("staff-day {staff_id}/{date} not locked for apply");
        }
        found
    }
}

pub(super) struct BookingStore {
    business: StdRwLock<Option<Arc<Business>>>,
    services: DashMap<Ulid, Service>,
    staff: DashMap<Ulid, Staff>,
    /// Keyed by normalized code.
    promotions: DashMap<String, SharedPromotion>,
    promotion_codes: DashMap<Ulid, String>,
    appointments: DashMap<Ulid, Appointment>,
    days: DashMap<(Ulid, NaiveDate), SharedStaffDay>,
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            business: StdRwLock::new(None),
            services: DashMap::new(),
            staff: DashMap::new(),
            promotions: DashMap::new(),
            promotion_codes: DashMap::new(),
            appointments: DashMap::new(),
            days: DashMap::new(),
        }
    }

    // ── Catalog ──────────────────────────────────────────────

    pub fn business(&self) -> Option<Arc<Business>> {
        self.business
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn all_services(&self) -> Vec<Service> {
        self.services.iter().map(|e| e.value().clone()).collect()
    }

    pub fn staff_member(&self, id: &Ulid) -> Option<Staff> {
        self.staff.get(id).map(|e| e.value().clone())
    }

    pub fn staff_count(&self) -> usize {
        self.staff.len()
    }

    /// All staff, sorted by id so "first available" is deterministic.
    pub fn all_staff(&self) -> Vec<Staff> {
        let mut staff: Vec<Staff> = self.staff.iter().map(|e| e.value().clone()).collect();
        staff.sort_by_key(|s| s.id);
        staff
    }

    pub fn promotion(&self, code: &str) -> Option<SharedPromotion> {
        self.promotions
            .get(&normalize_code(code))
            .map(|e| e.value().clone())
    }

    pub fn promotion_by_id(&self, id: &Ulid) -> Option<SharedPromotion> {
        let code = self.promotion_codes.get(id)?.value().clone();
        self.promotions.get(&code).map(|e| e.value().clone())
    }

    /// Owner of `code`, if any promotion currently uses it.
    pub fn code_owner(&self, code: &str) -> Option<Ulid> {
        let code = normalize_code(code);
        self.promotion_codes
            .iter()
            .find(|e| *e.value() == code)
            .map(|e| *e.key())
    }

    pub fn promotion_count(&self) -> usize {
        self.promotion_codes.len()
    }

    pub fn all_promotions(&self) -> Vec<SharedPromotion> {
        self.promotions.iter().map(|e| e.value().clone()).collect()
    }

    // ── Appointments ─────────────────────────────────────────

    pub fn appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub fn appointment_ids(&self) -> Vec<Ulid> {
        self.appointments.iter().map(|e| *e.key()).collect()
    }

    pub fn all_appointments(&self) -> Vec<Appointment> {
        let mut all: Vec<Appointment> = self.appointments.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|a| a.id);
        all
    }

    /// Get or lazily create the lock for a (staff, date) pair.
    pub fn staff_day(&self, staff_id: Ulid, date: NaiveDate) -> SharedStaffDay {
        self.days
            .entry((staff_id, date))
            .or_insert_with(|| Arc::new(RwLock::new(StaffDay::new(staff_id, date))))
            .value()
            .clone()
    }

    /// Lock for a (staff, date) pair only if something was ever booked there.
    pub fn existing_staff_day(&self, staff_id: Ulid, date: NaiveDate) -> Option<SharedStaffDay> {
        self.days.get(&(staff_id, date)).map(|e| e.value().clone())
    }

    // ── Event application ────────────────────────────────────

    /// Staff-days an event mutates, deduplicated and in lock order.
    pub fn days_touched(event: &Event) -> Vec<(Ulid, NaiveDate)> {
        let mut keys = match event {
            Event::AppointmentCreated { appointment, .. } if appointment.status.is_active() => {
                vec![(appointment.staff_id, appointment.date)]
            }
            Event::AppointmentRescheduled { staff_id, from, to, .. } => {
                vec![(*staff_id, from.date), (*staff_id, to.date)]
            }
            Event::AppointmentCancelled { staff_id, date, .. }
            | Event::StatusChanged { staff_id, date, .. } => vec![(*staff_id, *date)],
            _ => Vec::new(),
        };
        keys.sort();
        keys.dedup();
        keys
    }

    /// Promotion an event mutates, if it already exists.
    pub fn promotion_touched(&self, event: &Event) -> Option<SharedPromotion> {
        match event {
            Event::AppointmentCreated {
                redemption: Some(r), ..
            } => self.promotion_by_id(&r.promotion_id),
            Event::PromotionUpserted { promotion } => self.promotion_by_id(&promotion.id),
            _ => None,
        }
    }

    /// Apply an event to in-memory state. Staff-days and the promotion it
    /// touches must be passed in `locked`; nothing here awaits.
    pub fn apply(&self, event: &Event, mut locked: Locked<'_>) {
        match event {
            Event::BusinessConfigured { business } => {
                *self.business.write().unwrap_or_else(|e| e.into_inner()) =
                    Some(Arc::new(business.clone()));
            }
            Event::ServiceUpserted { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::StaffUpserted { staff } => {
                self.staff.insert(staff.id, staff.clone());
            }
            Event::PromotionUpserted { promotion } => {
                let code = normalize_code(&promotion.code);
                if let Some(current) = locked.promotion.as_deref_mut() {
                    *current = promotion.clone();
                }
                match self.promotion_codes.insert(promotion.id, code.clone()) {
                    Some(old) if old != code => {
                        if let Some((_, shared)) = self.promotions.remove(&old) {
                            self.promotions.insert(code, shared);
                        }
                    }
                    Some(_) => {}
                    None => {
                        self.promotions
                            .insert(code, Arc::new(Mutex::new(promotion.clone())));
                    }
                }
            }
            Event::AppointmentCreated {
                appointment,
                redemption,
            } => {
                if appointment.status.is_active()
                    && let Some(day) = locked.day_for(appointment.staff_id, appointment.date)
                {
                    day.insert(Booked {
                        appointment_id: appointment.id,
                        span: appointment.span,
                    });
                }
                if let Some(redemption) = redemption
                    && let Some(promotion) = locked.promotion.as_deref_mut()
                {
                    promotion.record_use(redemption.usage.clone());
                }
                self.appointments.insert(appointment.id, appointment.clone());
            }
            Event::AppointmentRescheduled {
                id,
                staff_id,
                from,
                to,
                change,
            } => {
                if let Some(day) = locked.day_for(*staff_id, from.date) {
                    day.remove(*id);
                }
                if let Some(day) = locked.day_for(*staff_id, to.date) {
                    day.insert(Booked {
                        appointment_id: *id,
                        span: to.span,
                    });
                }
                if let Some(mut appt) = self.appointments.get_mut(id) {
                    appt.date = to.date;
                    appt.span = to.span;
                    appt.start_at = crate::timegrid::at(to.date, to.span.start);
                    appt.end_at = crate::timegrid::at(to.date, to.span.end);
                    appt.history.push(change.clone());
                    appt.version += 1;
                }
            }
            Event::AppointmentCancelled {
                id,
                staff_id,
                date,
                record,
                change,
            } => {
                if let Some(day) = locked.day_for(*staff_id, *date) {
                    day.remove(*id);
                }
                if let Some(mut appt) = self.appointments.get_mut(id) {
                    appt.status = AppointmentStatus::Cancelled;
                    appt.cancellation = Some(record.clone());
                    appt.history.push(change.clone());
                    appt.version += 1;
                }
            }
            Event::StatusChanged {
                id,
                staff_id,
                date,
                status,
                tip,
                change,
            } => {
                if !status.is_active()
                    && let Some(day) = locked.day_for(*staff_id, *date)
                {
                    day.remove(*id);
                }
                if let Some(mut appt) = self.appointments.get_mut(id) {
                    appt.status = *status;
                    if let Some(tip) = tip {
                        appt.pricing.tip = *tip;
                        appt.pricing.final_total = appt.pricing.total + *tip;
                    }
                    appt.history.push(change.clone());
                    appt.version += 1;
                }
            }
            Event::DepositCaptured { id, charge } => {
                if let Some(mut appt) = self.appointments.get_mut(id) {
                    appt.pricing.deposit_paid = true;
                    appt.pricing.deposit_charge = Some(charge.clone());
                }
            }
        }
    }
}

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};
use futures::future::join_all;
use ulid::Ulid;

use crate::limits::MAX_SERVICES_PER_BOOKING;
use crate::model::*;

use super::availability::compute_slots;
use super::conflict;
use super::promotion::is_redeemable;
use super::{Engine, EngineError, pricing};

impl Engine {
    /// Snapshot the requested services, in request order.
    pub(super) fn service_lines(&self, service_ids: &[Ulid]) -> Result<Vec<ServiceLine>, EngineError> {
        if service_ids.is_empty() {
            return Err(EngineError::invalid("at least one service is required"));
        }
        if service_ids.len() > MAX_SERVICES_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many services in one booking"));
        }
        let mut seen = HashSet::with_capacity(service_ids.len());
        let mut lines = Vec::with_capacity(service_ids.len());
        for id in service_ids {
            if !seen.insert(*id) {
                return Err(EngineError::invalid(format!("service {id} requested twice")));
            }
            let service = self.store.service(id).ok_or(EngineError::NotFound(*id))?;
            if !service.active {
                return Err(EngineError::invalid(format!("service {id} is not offered")));
            }
            lines.push(ServiceLine::snapshot(&service));
        }
        Ok(lines)
    }

    /// Bookable slots for `date`. A closed day yields an empty list.
    ///
    /// Busy intervals are snapshotted per staff member under read locks, then
    /// evaluated without holding any lock.
    pub async fn check_availability(
        &self,
        date: NaiveDate,
        service_ids: &[Ulid],
        staff_id: Option<Ulid>,
    ) -> Result<Vec<Slot>, EngineError> {
        let started = std::time::Instant::now();
        let business = self.require_business()?;
        let lines = self.service_lines(service_ids)?;
        if let Some(id) = staff_id
            && self.store.staff_member(&id).is_none()
        {
            return Err(EngineError::NotFound(id));
        }

        let windows = business.schedule.windows_for(date.weekday());
        if windows.is_empty() {
            return Ok(Vec::new());
        }
        let total_duration: Minutes = lines.iter().map(|l| l.duration).sum::<Minutes>() + business.booking.buffer_time;

        let candidates: Vec<Ulid> = self
            .store
            .all_staff()
            .into_iter()
            .filter(|s| s.active && s.can_perform_all(service_ids))
            .filter(|s| staff_id.is_none_or(|id| id == s.id))
            .map(|s| s.id)
            .collect();
        let snapshots = join_all(candidates.into_iter().map(|id| async move {
            let busy = match self.store.existing_staff_day(id, date) {
                Some(day) => day.read().await.spans(),
                None => Vec::new(),
            };
            (id, busy)
        }))
        .await;

        let slots = compute_slots(&windows, business.booking.slot_duration, total_duration, &snapshots);
        metrics::histogram!(crate::observability::AVAILABILITY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(slots)
    }

    /// Price a prospective booking. An unusable code is an error rather than
    /// a silently undiscounted quote.
    pub async fn calculate_price(
        &self,
        service_ids: &[Ulid],
        discount_code: Option<&str>,
    ) -> Result<PriceQuote, EngineError> {
        let business = self.require_business()?;
        let lines = self.service_lines(service_ids)?;
        let promotion = match discount_code.map(normalize_code).filter(|c| !c.is_empty()) {
            Some(code) => {
                let subtotal = lines.iter().map(ServiceLine::final_price).sum();
                Some(self.validate_discount(&code, subtotal, service_ids).await?)
            }
            None => None,
        };
        Ok(pricing::quote(&lines, promotion.as_ref(), &business.booking.deposit))
    }

    /// Check a code without redeeming it. Every failure reads the same.
    pub async fn validate_discount(
        &self,
        code: &str,
        subtotal: Money,
        service_ids: &[Ulid],
    ) -> Result<Promotion, EngineError> {
        let Some(shared) = self.store.promotion(code) else {
            tracing::debug!("unknown promotion code {}", normalize_code(code));
            return Err(EngineError::InvalidPromotion);
        };
        let promotion = shared.lock().await.clone();
        if !is_redeemable(&promotion, subtotal, service_ids, self.now()) {
            tracing::debug!("promotion code {} not redeemable", promotion.code);
            return Err(EngineError::InvalidPromotion);
        }
        Ok(promotion)
    }

    pub fn get_appointment(&self, id: &Ulid) -> Result<Appointment, EngineError> {
        self.store.appointment(id).ok_or(EngineError::NotFound(*id))
    }

    /// Active appointments of one staff member on one date, by start time.
    pub async fn appointments_for(&self, staff_id: Ulid, date: NaiveDate) -> Vec<Appointment> {
        let Some(day) = self.store.existing_staff_day(staff_id, date) else {
            return Vec::new();
        };
        let guard = day.read().await;
        guard
            .booked
            .iter()
            .filter_map(|b| self.store.appointment(&b.appointment_id))
            .collect()
    }

    /// Diagnostic form of the conflict check; committing operations re-check
    /// under the write lock.
    pub async fn find_conflict(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Option<Ulid> {
        let day = self.store.existing_staff_day(staff_id, date)?;
        let guard = day.read().await;
        conflict::find_conflict(&guard, &span, exclude)
    }

    pub fn appointment_ids(&self) -> Vec<Ulid> {
        self.store.appointment_ids()
    }

    pub async fn promotion(&self, code: &str) -> Option<Promotion> {
        let shared = self.store.promotion(code)?;
        let promotion = shared.lock().await.clone();
        Some(promotion)
    }

    pub fn business(&self) -> Option<Business> {
        self.store.business().map(|b| (*b).clone())
    }
}

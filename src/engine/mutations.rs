use tokio::sync::oneshot;

use crate::catalog::Catalog;
use crate::limits::*;
use crate::model::*;
use crate::timegrid::MINUTES_PER_DAY;

use super::store::Locked;
use super::{Engine, EngineError, WalCommand};

fn check_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::invalid(format!("{what} must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_business(business: &Business) -> Result<(), EngineError> {
    check_name(&business.name, "business name")?;
    let booking = &business.booking;
    if booking.slot_duration <= 0 || booking.slot_duration > MINUTES_PER_DAY {
        return Err(EngineError::invalid("slot duration must be between 1 and 1440 minutes"));
    }
    if booking.buffer_time < 0 {
        return Err(EngineError::invalid("buffer time must not be negative"));
    }
    if booking.min_advance_minutes < 0 || booking.max_advance_days < 0 {
        return Err(EngineError::invalid("advance windows must not be negative"));
    }
    let deposit = &booking.deposit;
    if deposit.amount < 0 || (deposit.kind == DepositKind::Percentage && deposit.amount > 100) {
        return Err(EngineError::invalid("deposit amount out of range"));
    }
    if deposit.amount > MAX_PRICE {
        return Err(EngineError::LimitExceeded("deposit amount too large"));
    }
    let cancellation = &booking.cancellation;
    if cancellation.hours_before_appointment < 0 || !(0..=100).contains(&cancellation.penalty_percentage) {
        return Err(EngineError::invalid("cancellation policy out of range"));
    }

    for day in &business.schedule.days {
        if day.windows.len() > MAX_WINDOWS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many opening windows in one day"));
        }
        let mut windows = day.windows.clone();
        windows.sort_by_key(|w| w.open);
        for w in &windows {
            if w.open >= w.close {
                return Err(EngineError::invalid(format!("{:?}: window opens after it closes", day.day)));
            }
        }
        if windows.windows(2).any(|pair| pair[0].span().overlaps(&pair[1].span())) {
            return Err(EngineError::invalid(format!("{:?}: opening windows overlap", day.day)));
        }
    }
    Ok(())
}

fn validate_service(service: &Service) -> Result<(), EngineError> {
    check_name(&service.name, "service name")?;
    if service.duration <= 0 || service.duration > MINUTES_PER_DAY {
        return Err(EngineError::invalid("service duration must be between 1 and 1440 minutes"));
    }
    if service.price < 0 || service.final_price < 0 || service.final_price > service.price {
        return Err(EngineError::invalid("service price out of range"));
    }
    if service.price > MAX_PRICE {
        return Err(EngineError::LimitExceeded("service price too large"));
    }
    Ok(())
}

fn validate_promotion(promotion: &Promotion) -> Result<(), EngineError> {
    let code = normalize_code(&promotion.code);
    if code.is_empty() {
        return Err(EngineError::invalid("promotion code must not be empty"));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(EngineError::LimitExceeded("promotion code too long"));
    }
    if promotion.value < 0 || (promotion.kind == DiscountKind::Percentage && promotion.value > 100) {
        return Err(EngineError::invalid("discount value out of range"));
    }
    if promotion.max_discount_amount.is_some_and(|m| m < 0) || promotion.min_purchase.is_some_and(|m| m < 0) {
        return Err(EngineError::invalid("promotion amounts must not be negative"));
    }
    if promotion.value > MAX_PRICE
        || promotion.max_discount_amount.is_some_and(|m| m > MAX_PRICE)
        || promotion.min_purchase.is_some_and(|m| m > MAX_PRICE)
    {
        return Err(EngineError::LimitExceeded("promotion amount too large"));
    }
    if promotion.valid_from > promotion.valid_until {
        return Err(EngineError::invalid("promotion validity window is empty"));
    }
    Ok(())
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub async fn configure_business(&self, business: Business) -> Result<(), EngineError> {
        if business.id != self.business_id {
            return Err(EngineError::invalid(format!(
                "business {} does not belong to this engine",
                business.id
            )));
        }
        validate_business(&business)?;
        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        let event = Event::BusinessConfigured { business };
        self.persist_and_apply(&event, Locked::none()).await?;
        tracing::info!("business {} configured", self.business_id);
        Ok(())
    }

    pub async fn upsert_service(&self, service: Service) -> Result<(), EngineError> {
        validate_service(&service)?;
        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.store.service(&service.id).is_none() && self.store.service_count() >= MAX_SERVICES_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        let id = service.id;
        self.persist_and_apply(&Event::ServiceUpserted { service }, Locked::none())
            .await?;
        tracing::debug!("service {id} upserted");
        Ok(())
    }

    /// Every listed service must already exist.
    pub async fn upsert_staff(&self, staff: Staff) -> Result<(), EngineError> {
        check_name(&staff.name, "staff name")?;
        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if let Some(missing) = staff.service_ids.iter().find(|s| self.store.service(s).is_none()) {
            return Err(EngineError::NotFound(*missing));
        }
        if self.store.staff_member(&staff.id).is_none() && self.store.staff_count() >= MAX_STAFF_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many staff members"));
        }
        let id = staff.id;
        self.persist_and_apply(&Event::StaffUpserted { staff }, Locked::none())
            .await?;
        tracing::debug!("staff member {id} upserted");
        Ok(())
    }

    /// Create or replace a promotion. The code is stored normalized.
    ///
    /// Replacing keeps the stored usage count and usage records; only
    /// redemptions change those.
    pub async fn upsert_promotion(&self, mut promotion: Promotion) -> Result<Promotion, EngineError> {
        validate_promotion(&promotion)?;
        promotion.code = normalize_code(&promotion.code);

        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if let Some(owner) = self.store.code_owner(&promotion.code)
            && owner != promotion.id
        {
            return Err(EngineError::invalid(format!(
                "promotion code {} is already in use",
                promotion.code
            )));
        }

        match self.store.promotion_by_id(&promotion.id) {
            Some(shared) => {
                let mut current = shared.lock().await;
                promotion.current_uses = current.current_uses;
                promotion.usages = current.usages.clone();
                let event = Event::PromotionUpserted {
                    promotion: promotion.clone(),
                };
                let locked = Locked {
                    days: Vec::new(),
                    promotion: Some(&mut *current),
                };
                self.persist_and_apply(&event, locked).await?;
            }
            None => {
                if self.store.promotion_count() >= MAX_PROMOTIONS_PER_BUSINESS {
                    return Err(EngineError::LimitExceeded("too many promotions"));
                }
                let event = Event::PromotionUpserted {
                    promotion: promotion.clone(),
                };
                self.persist_and_apply(&event, Locked::none()).await?;
            }
        }
        tracing::info!("promotion {} ({}) upserted", promotion.code, promotion.id);
        Ok(promotion)
    }

    /// Import a whole catalog: business first, then services, staff and
    /// promotions. Stops at the first rejected record; earlier records stay.
    pub async fn load_catalog(&self, catalog: Catalog) -> Result<(), EngineError> {
        if let Some(business) = catalog.business {
            self.configure_business(business).await?;
        }
        for service in catalog.services {
            self.upsert_service(service).await?;
        }
        for staff in catalog.staff {
            self.upsert_staff(staff).await?;
        }
        for promotion in catalog.promotions {
            self.upsert_promotion(promotion).await?;
        }
        Ok(())
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::new();

        if let Some(business) = self.store.business() {
            events.push(Event::BusinessConfigured {
                business: (*business).clone(),
            });
        }
        let mut services = self.store.all_services();
        services.sort_by_key(|s| s.id);
        events.extend(services.into_iter().map(|service| Event::ServiceUpserted { service }));
        events.extend(
            self.store
                .all_staff()
                .into_iter()
                .map(|staff| Event::StaffUpserted { staff }),
        );

        let mut promotions = Vec::new();
        for shared in self.store.all_promotions() {
            promotions.push(shared.lock().await.clone());
        }
        promotions.sort_by_key(|p| p.id);
        events.extend(
            promotions
                .into_iter()
                .map(|promotion| Event::PromotionUpserted { promotion }),
        );

        // Snapshots already carry status, history and pricing, so no redemption is repeated.
        events.extend(
            self.store
                .all_appointments()
                .into_iter()
                .map(|appointment| Event::AppointmentCreated {
                    appointment,
                    redemption: None,
                }),
        );

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("business {}: WAL compacted to {count} events", self.business_id);
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Weekday};
    use ulid::Ulid;

    fn business() -> Business {
        Business {
            id: Ulid::new(),
            name: "Studio".into(),
            schedule: WeeklySchedule {
                days: vec![DaySchedule {
                    day: Weekday::Mon,
                    is_open: true,
                    windows: vec![TimeWindow { open: 540, close: 720 }, TimeWindow { open: 780, close: 1080 }],
                }],
            },
            booking: BookingConfig {
                slot_duration: 30,
                buffer_time: 10,
                min_advance_minutes: 60,
                max_advance_days: 60,
                requires_confirmation: false,
                deposit: DepositPolicy::none(),
                cancellation: CancellationPolicy {
                    allow_cancellation: true,
                    hours_before_appointment: 24,
                    penalty_percentage: 50,
                },
                allow_reschedule: true,
            },
        }
    }

    #[test]
    fn business_validation() {
        assert!(validate_business(&business()).is_ok());

        let mut b = business();
        b.schedule.days[0].windows.push(TimeWindow { open: 700, close: 800 });
        assert!(matches!(validate_business(&b), Err(EngineError::InvalidRequest(_))));

        let mut b = business();
        b.booking.slot_duration = 0;
        assert!(validate_business(&b).is_err());

        let mut b = business();
        b.booking.cancellation.penalty_percentage = 150;
        assert!(validate_business(&b).is_err());

        let mut b = business();
        b.schedule.days[0].windows = vec![TimeWindow { open: 60, close: 90 }; MAX_WINDOWS_PER_DAY + 1];
        assert!(matches!(validate_business(&b), Err(EngineError::LimitExceeded(_))));

        let mut b = business();
        b.booking.deposit = DepositPolicy {
            required: true,
            kind: DepositKind::Fixed,
            amount: MAX_PRICE + 1,
        };
        assert!(matches!(validate_business(&b), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn service_validation() {
        let service = Service {
            id: Ulid::new(),
            name: "Cut".into(),
            duration: 30,
            price: 5000,
            final_price: 4500,
            active: true,
        };
        assert!(validate_service(&service).is_ok());
        assert!(validate_service(&Service { final_price: 6000, ..service.clone() }).is_err());
        assert!(validate_service(&Service { duration: 0, ..service.clone() }).is_err());
        assert!(validate_service(&Service { name: " ".into(), ..service.clone() }).is_err());

        let top = Service {
            price: MAX_PRICE,
            final_price: MAX_PRICE,
            ..service
        };
        assert!(validate_service(&top).is_ok());
        let over = Service {
            price: MAX_PRICE + 1,
            ..top
        };
        assert!(matches!(validate_service(&over), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn promotion_validation() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let promotion = Promotion {
            id: Ulid::new(),
            code: " save10 ".into(),
            kind: DiscountKind::Percentage,
            value: 10,
            max_discount_amount: Some(500),
            valid_from: day.and_hms_opt(0, 0, 0).unwrap(),
            valid_until: day.and_hms_opt(23, 0, 0).unwrap(),
            total_uses: None,
            current_uses: 0,
            min_purchase: None,
            service_ids: None,
            active: true,
            usages: Vec::new(),
        };
        assert!(validate_promotion(&promotion).is_ok());
        assert!(validate_promotion(&Promotion { value: 101, ..promotion.clone() }).is_err());
        assert!(validate_promotion(&Promotion { code: "  ".into(), ..promotion.clone() }).is_err());
        let huge_fixed = Promotion {
            kind: DiscountKind::Fixed,
            value: MAX_PRICE + 1,
            ..promotion.clone()
        };
        assert!(matches!(validate_promotion(&huge_fixed), Err(EngineError::LimitExceeded(_))));
        let huge_cap = Promotion {
            max_discount_amount: Some(i64::MAX),
            ..promotion.clone()
        };
        assert!(matches!(validate_promotion(&huge_cap), Err(EngineError::LimitExceeded(_))));
        let inverted = Promotion {
            valid_from: promotion.valid_until,
            valid_until: promotion.valid_from,
            ..promotion
        };
        assert!(validate_promotion(&inverted).is_err());
    }
}

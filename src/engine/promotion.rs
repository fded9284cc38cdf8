use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::*;

/// Every redemption rule at once. Callers learn only yes or no.
pub fn is_redeemable(promotion: &Promotion, subtotal: Money, service_ids: &[Ulid], now: NaiveDateTime) -> bool {
    if !promotion.active {
        return false;
    }
    if now < promotion.valid_from || now > promotion.valid_until {
        return false;
    }
    if let Some(total_uses) = promotion.total_uses
        && promotion.current_uses >= total_uses
    {
        return false;
    }
    if let Some(min_purchase) = promotion.min_purchase
        && subtotal < min_purchase
    {
        return false;
    }
    if let Some(eligible) = &promotion.service_ids
        && !service_ids.iter().any(|s| eligible.contains(s))
    {
        return false;
    }
    true
}

/// Discount a promotion grants on `subtotal`. Fixed amounts are not clamped
/// here; the total computation floors at zero.
pub fn discount_for(promotion: &Promotion, subtotal: Money) -> Money {
    let raw = match promotion.kind {
        DiscountKind::Percentage => {
            let pct = subtotal * promotion.value / 100;
            promotion.max_discount_amount.map_or(pct, |cap| pct.min(cap))
        }
        DiscountKind::Fixed => promotion.value,
    };
    raw.max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn promo(kind: DiscountKind, value: Money) -> Promotion {
        Promotion {
            id: Ulid::new(),
            code: "SAVE10".into(),
            kind,
            value,
            max_discount_amount: None,
            valid_from: now() - Duration::days(1),
            valid_until: now() + Duration::days(1),
            total_uses: None,
            current_uses: 0,
            min_purchase: None,
            service_ids: None,
            active: true,
            usages: Vec::new(),
        }
    }

    #[test]
    fn percentage_clamped_to_cap() {
        let mut p = promo(DiscountKind::Percentage, 10);
        p.max_discount_amount = Some(500);
        assert_eq!(discount_for(&p, 10_000), 500);
        p.max_discount_amount = None;
        assert_eq!(discount_for(&p, 10_000), 1_000);
    }

    #[test]
    fn percentage_floors_fractions() {
        let p = promo(DiscountKind::Percentage, 15);
        assert_eq!(discount_for(&p, 999), 149);
    }

    #[test]
    fn fixed_is_not_clamped_to_subtotal() {
        let p = promo(DiscountKind::Fixed, 3_000);
        assert_eq!(discount_for(&p, 2_000), 3_000);
    }

    #[test]
    fn window_edges_are_inclusive() {
        let p = promo(DiscountKind::Fixed, 100);
        assert!(is_redeemable(&p, 1_000, &[], p.valid_from));
        assert!(is_redeemable(&p, 1_000, &[], p.valid_until));
        assert!(!is_redeemable(&p, 1_000, &[], p.valid_until + Duration::seconds(1)));
        assert!(!is_redeemable(&p, 1_000, &[], p.valid_from - Duration::seconds(1)));
    }

    #[test]
    fn inactive_or_exhausted_is_rejected() {
        let mut p = promo(DiscountKind::Fixed, 100);
        p.active = false;
        assert!(!is_redeemable(&p, 1_000, &[], now()));

        let mut p = promo(DiscountKind::Fixed, 100);
        p.total_uses = Some(2);
        p.current_uses = 1;
        assert!(is_redeemable(&p, 1_000, &[], now()));
        p.current_uses = 2;
        assert!(!is_redeemable(&p, 1_000, &[], now()));
    }

    #[test]
    fn minimum_purchase() {
        let mut p = promo(DiscountKind::Fixed, 100);
        p.min_purchase = Some(5_000);
        assert!(!is_redeemable(&p, 4_999, &[], now()));
        assert!(is_redeemable(&p, 5_000, &[], now()));
    }

    #[test]
    fn restricted_services_need_one_match() {
        let (eligible, other) = (Ulid::new(), Ulid::new());
        let mut p = promo(DiscountKind::Fixed, 100);
        p.service_ids = Some(vec![eligible]);
        assert!(is_redeemable(&p, 1_000, &[other, eligible], now()));
        assert!(!is_redeemable(&p, 1_000, &[other], now()));
    }

    #[test]
    fn validation_is_idempotent() {
        let mut p = promo(DiscountKind::Percentage, 10);
        p.total_uses = Some(1);
        let first = is_redeemable(&p, 10_000, &[], now());
        let second = is_redeemable(&p, 10_000, &[], now());
        assert_eq!(first, second);
        assert_eq!(p.current_uses, 0);
    }
}

use crate::model::*;

use super::promotion::discount_for;

/// Deposit owed on `total`. Never negative and never above `total`.
pub fn deposit_for(total: Money, policy: &DepositPolicy) -> Money {
    if !policy.required {
        return 0;
    }
    let raw = match policy.kind {
        DepositKind::Percentage => total * policy.amount / 100,
        DepositKind::Fixed => policy.amount,
    };
    raw.clamp(0, total.max(0))
}

/// Price a set of service lines with an already validated promotion.
pub fn quote(lines: &[ServiceLine], promotion: Option<&Promotion>, deposit: &DepositPolicy) -> PriceQuote {
    let subtotal: Money = lines.iter().map(ServiceLine::final_price).sum();
    let discount = promotion.map_or(0, |p| discount_for(p, subtotal));
    let total = (subtotal - discount).max(0);
    PriceQuote {
        subtotal,
        discount,
        total,
        deposit: deposit_for(total, deposit),
        promotion_id: promotion.map(|p| p.id),
        promotion_code: promotion.map(|p| normalize_code(&p.code)),
    }
}

impl PriceQuote {
    /// Snapshot stored on a new appointment. Tip starts at zero.
    pub fn snapshot(&self) -> PricingSnapshot {
        PricingSnapshot {
            subtotal: self.subtotal,
            discount: self.discount,
            promotion_id: self.promotion_id,
            promotion_code: self.promotion_code.clone(),
            deposit: self.deposit,
            deposit_paid: false,
            deposit_charge: None,
            total: self.total,
            tip: 0,
            final_total: self.total,
        }
    }
}

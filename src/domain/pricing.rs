//! Order pricing.
//!
//! All amounts are minor currency units. Nothing here reads the clock, the
//! catalog or the database, so a stored order can always be re-priced from its
//! own line items to audit the totals it was created with.

use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A line that can be priced: a cart item or a copied order item.
pub trait Priceable {
    fn unit_price(&self) -> i64;
    fn quantity(&self) -> i32;

    fn line_total(&self) -> i64 {
        self.unit_price().saturating_mul(i64::from(self.quantity()))
    }
}

/// How a tax or delivery charge is derived from the subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charge {
    Flat { amount: i64 },
    Rate { rate: Decimal },
}

impl Charge {
    fn apply(&self, subtotal: i64) -> i64 {
        match self {
            Charge::Flat { amount } => *amount,
            Charge::Rate { rate } => apply_rate(*rate, subtotal),
        }
    }
}

/// Pricing inputs supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingPolicy {
    pub tax: Charge,
    pub delivery_fee: Charge,
    pub service_fee_rate: Decimal,
    pub service_fee_cap: i64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax: Charge::Flat { amount: 0 },
            delivery_fee: Charge::Flat { amount: 0 },
            service_fee_rate: Decimal::new(2, 2),
            service_fee_cap: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceBreakdown {
    pub subtotal: i64,
    pub tax: i64,
    pub delivery_fee: i64,
    pub service_fee: i64,
    pub total: i64,
}

/// Prices `items` under `policy`.
///
/// `service_fee = min(rate * (subtotal + tax + delivery_fee), cap)` and
/// `total` is the plain sum of the four components.
pub fn compute<T: Priceable>(items: &[T], policy: &PricingPolicy) -> PriceBreakdown {
    // Carts bound line quantities and prices, so saturation only guards
    // against rows written outside those bounds.
    let subtotal = items
        .iter()
        .map(Priceable::line_total)
        .fold(0_i64, i64::saturating_add);
    let tax = policy.tax.apply(subtotal);
    let delivery_fee = policy.delivery_fee.apply(subtotal);
    let base = subtotal.saturating_add(tax).saturating_add(delivery_fee);
    let service_fee = apply_rate(policy.service_fee_rate, base).min(policy.service_fee_cap);

    PriceBreakdown {
        subtotal,
        tax,
        delivery_fee,
        service_fee,
        total: base.saturating_add(service_fee),
    }
}

fn apply_rate(rate: Decimal, amount: i64) -> i64 {
    (rate * Decimal::from(amount))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Line(i64, i32);

    impl Priceable for Line {
        fn unit_price(&self) -> i64 {
            self.0
        }

        fn quantity(&self) -> i32 {
            self.1
        }
    }

    fn policy(tax: i64, delivery: i64) -> PricingPolicy {
        PricingPolicy {
            tax: Charge::Flat { amount: tax },
            delivery_fee: Charge::Flat { amount: delivery },
            ..PricingPolicy::default()
        }
    }

    #[test]
    fn single_line_example() {
        let breakdown = compute(&[Line(1000, 2)], &policy(150, 300));

        assert_eq!(breakdown.subtotal, 2000);
        assert_eq!(breakdown.service_fee, 49);
        assert_eq!(breakdown.total, 2499);
    }

    #[test]
    fn service_fee_is_capped() {
        let breakdown = compute(&[Line(50_000, 3)], &policy(0, 0));

        assert_eq!(breakdown.subtotal, 150_000);
        assert_eq!(breakdown.service_fee, 500);
        assert_eq!(breakdown.total, 150_500);
    }

    #[test]
    fn rate_tax_rounds_half_away_from_zero() {
        let policy = PricingPolicy {
            tax: Charge::Rate {
                rate: Decimal::new(75, 3),
            },
            ..PricingPolicy::default()
        };

        // 7.5% of 1.10 = 0.0825 -> 8 cents
        let breakdown = compute(&[Line(110, 1)], &policy);
        assert_eq!(breakdown.tax, 8);
    }

    #[test]
    fn components_always_sum_to_total() {
        let policy = PricingPolicy {
            tax: Charge::Rate {
                rate: Decimal::new(8, 2),
            },
            delivery_fee: Charge::Flat { amount: 299 },
            service_fee_rate: Decimal::new(2, 2),
            service_fee_cap: 500,
        };

        for (price, qty) in [(1, 1), (99, 3), (1234, 7), (45_000, 9), (0, 4)] {
            let b = compute(&[Line(price, qty), Line(250, 2)], &policy);
            let base = b.subtotal + b.tax + b.delivery_fee;

            assert_eq!(b.total, base + b.service_fee);
            assert_eq!(b.service_fee, apply_rate(policy.service_fee_rate, base).min(500));
        }
    }

    #[test]
    fn empty_items_still_charge_flat_fees() {
        let breakdown = compute::<Line>(&[], &policy(0, 300));

        assert_eq!(breakdown.subtotal, 0);
        assert_eq!(breakdown.service_fee, 6);
        assert_eq!(breakdown.total, 306);
    }

    #[test]
    fn oversized_lines_saturate_instead_of_wrapping() {
        let breakdown = compute(&[Line(i64::MAX / 2 + 1, 2), Line(1, 1)], &policy(150, 300));

        assert_eq!(breakdown.subtotal, i64::MAX);
        assert_eq!(breakdown.total, i64::MAX);
        assert!(breakdown.service_fee >= 0);
    }
}

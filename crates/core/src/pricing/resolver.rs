use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::discount::{Discount, DiscountId, DiscountKind};
use crate::domain::quote::QuoteSnapshot;
use crate::pricing::margin::margin_percentage;

/// A discount row paired with its attachment data: either loaded from the
/// persisted attachment set or supplied ad hoc for a preview.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscountCandidate {
    pub discount: Discount,
    pub duration: Option<u32>,
    /// Caller-supplied ranking; breaks ties inside one kind.
    pub sort: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub discount_id: DiscountId,
    pub kind: DiscountKind,
    pub name: String,
    pub amount: Decimal,
    /// Derived annotation recomputed after this discount landed; later steps
    /// never read it.
    pub margin_percentage: Decimal,
}

/// The four fixed API buckets, present even when empty.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscountGroups {
    pub multi_year: Vec<AppliedDiscount>,
    pub pre_pay: Vec<AppliedDiscount>,
    pub promotions: Vec<AppliedDiscount>,
    pub snd: Vec<AppliedDiscount>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDiscounts {
    pub total: Decimal,
    pub applied: Vec<AppliedDiscount>,
}

impl ResolvedDiscounts {
    pub fn grouped(&self) -> DiscountGroups {
        let mut groups = DiscountGroups::default();
        for entry in &self.applied {
            match entry.kind {
                DiscountKind::MultiYear => groups.multi_year.push(entry.clone()),
                DiscountKind::PrePay => groups.pre_pay.push(entry.clone()),
                DiscountKind::Promotional => groups.promotions.push(entry.clone()),
                DiscountKind::Snd => groups.snd.push(entry.clone()),
            }
        }
        groups
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DiscountResolver;

impl DiscountResolver {
    /// Filters candidates to those eligible for the snapshot, orders them by
    /// the fixed kind precedence and applies them sequentially, each against
    /// the running total left by its predecessors.
    pub fn resolve<S: QuoteSnapshot>(
        &self,
        snapshot: &S,
        mut candidates: Vec<DiscountCandidate>,
        total: Decimal,
        buy_price: Decimal,
    ) -> ResolvedDiscounts {
        let list_price = total;
        candidates.retain(|candidate| {
            candidate.discount.applies_to(
                snapshot.vendor(),
                snapshot.country(),
                snapshot.quote_type(),
            )
        });
        candidates
            .sort_by_key(|candidate| (candidate.discount.kind.precedence(), candidate.sort));

        let mut running = total;
        let mut applied = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let amount =
                candidate.discount.calculate_discount(running, list_price, candidate.duration);
            running -= amount;
            applied.push(AppliedDiscount {
                discount_id: candidate.discount.id.clone(),
                kind: candidate.discount.kind,
                name: candidate.discount.name.clone(),
                amount,
                margin_percentage: margin_percentage(running, buy_price),
            });
        }

        ResolvedDiscounts { total: running, applied }
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::artifacts::{QuoteRow, RowId};
use crate::domain::margin::CountryMargin;
use crate::domain::quote::{QuoteSnapshot, SnapshotRef};
use crate::pricing::margin::{margin_percentage, total_after_margin};
use crate::pricing::resolver::{
    DiscountCandidate, DiscountGroups, DiscountResolver, ResolvedDiscounts,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowBreakdown {
    pub row_id: RowId,
    pub product: String,
    pub quantity: u32,
    pub buy_price: Decimal,
    pub list_price: Decimal,
    pub sell_price: Decimal,
}

/// Rendered price breakdown for export, API reads and post-processing
/// display. Read-only; persists nothing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub snapshot: SnapshotRef,
    pub rows: Vec<RowBreakdown>,
    pub subtotal: Decimal,
    pub margin_delta: Decimal,
    pub margin_percentage: Decimal,
    pub discounts: ResolvedDiscounts,
    pub groups: DiscountGroups,
    pub total: Decimal,
}

/// Signed margin adjustment: the country margin value less the custom
/// discount granted to the customer.
pub fn margin_delta(margin: Option<&CountryMargin>, custom_discount: Option<Decimal>) -> Decimal {
    let margin_value = margin.map(|m| m.value).unwrap_or(Decimal::ZERO);
    margin_value - custom_discount.unwrap_or(Decimal::ZERO)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ReviewService {
    resolver: DiscountResolver,
}

impl ReviewService {
    /// Composes selected rows with the margin delta and the discount set.
    /// Per-row sell prices come from the same bottom-up reconstruction the
    /// state processor uses; there is deliberately no second inline copy of
    /// the divider arithmetic.
    pub fn compose<S: QuoteSnapshot>(
        &self,
        snapshot: &S,
        rows: &[QuoteRow],
        margin: Option<&CountryMargin>,
        candidates: Vec<DiscountCandidate>,
    ) -> PriceBreakdown {
        let delta = margin_delta(margin, snapshot.custom_discount());

        let mut breakdown_rows = Vec::with_capacity(rows.len());
        let mut subtotal = Decimal::ZERO;
        let mut buy_total = Decimal::ZERO;
        for row in rows.iter().filter(|row| row.selected) {
            let quantity = Decimal::from(row.quantity);
            let row_list = row.list_price * quantity;
            let row_buy = row.buy_price * quantity;
            let sell = total_after_margin(row_list, row_buy, delta);
            subtotal += sell;
            buy_total += row_buy;
            breakdown_rows.push(RowBreakdown {
                row_id: row.id.clone(),
                product: row.product.clone(),
                quantity: row.quantity,
                buy_price: row_buy,
                list_price: row_list,
                sell_price: sell,
            });
        }

        let discounts = self.resolver.resolve(snapshot, candidates, subtotal, buy_total);
        let groups = discounts.grouped();
        let total = discounts.total;

        PriceBreakdown {
            snapshot: snapshot.snapshot_ref(),
            rows: breakdown_rows,
            subtotal,
            margin_delta: delta,
            margin_percentage: margin_percentage(total, buy_total),
            discounts,
            groups,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{margin_delta, ReviewService};
    use crate::domain::artifacts::{QuoteRow, RowId};
    use crate::domain::margin::{CountryMargin, MarginId, MarginMethod};
    use crate::domain::quote::{CustomerId, Quote, QuoteId, QuoteType, SnapshotRef};

    fn snapshot(custom_discount: Option<Decimal>) -> Quote {
        Quote {
            id: QuoteId("q-1".to_string()),
            customer_id: CustomerId("c-1".to_string()),
            company: "Acme".to_string(),
            vendor: "vendorco".to_string(),
            country: "DE".to_string(),
            quote_type: QuoteType::New,
            active_version: None,
            submitted_at: None,
            activated_at: None,
            margin_id: Some(MarginId("m-1".to_string())),
            custom_discount,
            buy_price: Decimal::from(700),
            group_mode: false,
            currency_from: "USD".to_string(),
            currency_to: "EUR".to_string(),
            price_list_file: None,
            payment_schedule_file: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn margin(value: i64) -> CountryMargin {
        CountryMargin {
            id: MarginId("m-1".to_string()),
            vendor: "vendorco".to_string(),
            country: "DE".to_string(),
            quote_type: QuoteType::New,
            is_fixed: false,
            value: Decimal::from(value),
            method: MarginMethod::Margin,
        }
    }

    fn row(id: &str, buy: i64, list: i64, quantity: u32, selected: bool) -> QuoteRow {
        QuoteRow {
            id: RowId(id.to_string()),
            snapshot: SnapshotRef::Quote(QuoteId("q-1".to_string())),
            replicated_row_id: None,
            product: format!("product-{id}"),
            buy_price: Decimal::from(buy),
            list_price: Decimal::from(list),
            quantity,
            selected,
        }
    }

    #[test]
    fn margin_delta_subtracts_the_custom_discount() {
        let margin = margin(10);
        assert_eq!(margin_delta(Some(&margin), None), Decimal::from(10));
        assert_eq!(
            margin_delta(Some(&margin), Some(Decimal::from(4))),
            Decimal::from(6)
        );
        assert_eq!(margin_delta(None, Some(Decimal::from(4))), Decimal::from(-4));
    }

    #[test]
    fn compose_reprices_each_selected_row_through_the_margin_delta() {
        let service = ReviewService::default();
        let margin = margin(10);
        let breakdown = service.compose(
            &snapshot(None),
            &[row("r-1", 700, 1000, 1, true), row("r-2", 1, 1, 1, false)],
            Some(&margin),
            Vec::new(),
        );

        assert_eq!(breakdown.rows.len(), 1, "unselected rows stay out");
        assert_eq!(breakdown.rows[0].sell_price.round_dp(2), Decimal::new(1166_67, 2));
        assert_eq!(breakdown.subtotal, breakdown.total, "no discounts applied");
        assert_eq!(breakdown.margin_delta, Decimal::from(10));
    }

    #[test]
    fn compose_with_zero_delta_keeps_list_prices() {
        let service = ReviewService::default();
        let breakdown =
            service.compose(&snapshot(None), &[row("r-1", 700, 1000, 2, true)], None, Vec::new());
        assert_eq!(breakdown.rows[0].sell_price.round_dp(8), Decimal::from(2000).round_dp(8));
    }
}

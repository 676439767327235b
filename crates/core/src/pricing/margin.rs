use rust_decimal::Decimal;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Bottom-up margin reconstruction.
///
/// The stored value is a margin *delta* (country margin combined with the
/// custom discount), not an absolute target price. This closed form recovers
/// the sell price such that `(new - buy) / new` lands on
/// `initial margin + delta`, without iteration.
///
/// `total == 0` short-circuits to zero so the initial-margin ratio never
/// divides by zero. A combined margin fraction at or above 1 switches to the
/// reciprocal divider `1 / (fraction + 1)` so the divider stays positive.
pub fn total_after_margin(total: Decimal, buy: Decimal, margin_diff_pct: Decimal) -> Decimal {
    if total.is_zero() {
        return Decimal::ZERO;
    }

    let initial_margin_pct = (total - buy) / total * HUNDRED;
    let margin_fraction = (initial_margin_pct + margin_diff_pct) / HUNDRED;
    let divider = if margin_fraction >= Decimal::ONE {
        Decimal::ONE / (margin_fraction + Decimal::ONE)
    } else {
        Decimal::ONE - margin_fraction
    };

    buy / divider
}

/// `(total - buy) / total * 100`, zero-guarded.
pub fn margin_percentage(total: Decimal, buy: Decimal) -> Decimal {
    if total.is_zero() {
        return Decimal::ZERO;
    }
    (total - buy) / total * HUNDRED
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{margin_percentage, total_after_margin};

    #[test]
    fn zero_delta_is_the_identity() {
        for (total, buy) in [(1000i64, 700i64), (50, 20), (3, 1)] {
            let total = Decimal::from(total);
            let buy = Decimal::from(buy);
            let result = total_after_margin(total, buy, Decimal::ZERO);
            assert_eq!(result.round_dp(8), total.round_dp(8), "total={total} buy={buy}");
        }
    }

    #[test]
    fn zero_price_short_circuits() {
        assert_eq!(
            total_after_margin(Decimal::ZERO, Decimal::from(700), Decimal::from(25)),
            Decimal::ZERO
        );
        assert_eq!(margin_percentage(Decimal::ZERO, Decimal::from(700)), Decimal::ZERO);
    }

    #[test]
    fn worked_example_from_the_pricing_sheet() {
        // initial margin 30%, delta +10% => divider 0.6 => 700 / 0.6
        let result =
            total_after_margin(Decimal::from(1000), Decimal::from(700), Decimal::from(10));
        assert_eq!(result.round_dp(2), Decimal::new(1166_67, 2));
    }

    #[test]
    fn margin_at_or_above_one_hundred_uses_reciprocal_divider() {
        // initial margin 50%, delta +50% => fraction 1.0 => divider 1/2
        let result =
            total_after_margin(Decimal::from(1000), Decimal::from(500), Decimal::from(50));
        assert_eq!(result, Decimal::from(1000));

        // fraction above 1 stays positive as well
        let above =
            total_after_margin(Decimal::from(1000), Decimal::from(500), Decimal::from(70));
        assert!(above > Decimal::ZERO);
    }

    #[test]
    fn negative_delta_lowers_the_sell_price() {
        let result =
            total_after_margin(Decimal::from(1000), Decimal::from(700), Decimal::from(-10));
        assert_eq!(result.round_dp(2), Decimal::new(875_00, 2));
    }

    #[test]
    fn margin_percentage_is_the_inverse_ratio() {
        assert_eq!(
            margin_percentage(Decimal::from(1000), Decimal::from(700)),
            Decimal::from(30)
        );
    }
}

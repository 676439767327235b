use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::{QuoteType, SnapshotRef};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscountId(pub String);

/// Fixed evaluation order: multi-year before pre-pay before promotional
/// before SnD, regardless of how the caller supplied the candidates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    MultiYear,
    PrePay,
    Promotional,
    Snd,
}

impl DiscountKind {
    pub fn precedence(&self) -> u8 {
        match self {
            Self::MultiYear => 0,
            Self::PrePay => 1,
            Self::Promotional => 2,
            Self::Snd => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultiYear => "multi_year",
            Self::PrePay => "pre_pay",
            Self::Promotional => "promotional",
            Self::Snd => "snd",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "multi_year" => Some(Self::MultiYear),
            "pre_pay" => Some(Self::PrePay),
            "promotional" => Some(Self::Promotional),
            "snd" => Some(Self::Snd),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DurationTier {
    /// Minimum duration (years) for the tier to apply.
    pub min_duration: u32,
    pub percent: Decimal,
}

/// How a discount row turns into an amount. Dispatch is by tag, never by an
/// inheritance chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum DiscountMethod {
    /// Fixed amount, independent of the running price.
    Flat,
    /// Percentage of the snapshot's list price.
    PercentOfList,
    /// Percentage of the current running price.
    PercentOfPrice,
    /// Percentage selected by the attachment duration; tiers are tried from
    /// the highest minimum downward and the first satisfied one wins.
    TieredByDuration { tiers: Vec<DurationTier> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub id: DiscountId,
    pub kind: DiscountKind,
    pub name: String,
    pub method: DiscountMethod,
    pub value: Decimal,
    pub vendor: String,
    pub country: String,
    pub quote_type: QuoteType,
    pub activated: bool,
}

impl Discount {
    pub fn applies_to(&self, vendor: &str, country: &str, quote_type: QuoteType) -> bool {
        self.activated
            && self.vendor == vendor
            && self.country == country
            && self.quote_type == quote_type
    }

    /// Amount this discount takes off the running price.
    pub fn calculate_discount(
        &self,
        price: Decimal,
        list_price: Decimal,
        duration: Option<u32>,
    ) -> Decimal {
        match &self.method {
            DiscountMethod::Flat => self.value,
            DiscountMethod::PercentOfList => percent_of(list_price, self.value),
            DiscountMethod::PercentOfPrice => percent_of(price, self.value),
            DiscountMethod::TieredByDuration { tiers } => {
                let Some(duration) = duration else {
                    return Decimal::ZERO;
                };
                let mut best: Option<&DurationTier> = None;
                for tier in tiers {
                    if duration >= tier.min_duration
                        && best.map_or(true, |b| tier.min_duration > b.min_duration)
                    {
                        best = Some(tier);
                    }
                }
                best.map(|tier| percent_of(price, tier.percent)).unwrap_or(Decimal::ZERO)
            }
        }
    }
}

pub fn percent_of(price: Decimal, percent: Decimal) -> Decimal {
    price * percent / Decimal::from(100)
}

/// Association row binding a discount to a snapshot, with the optional
/// duration the tiered variants read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscountAttachment {
    pub snapshot: SnapshotRef,
    pub discount_id: DiscountId,
    pub duration: Option<u32>,
    pub sort: i32,
}

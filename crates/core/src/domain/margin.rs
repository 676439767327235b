use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::QuoteType;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarginId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginMethod {
    Markup,
    Margin,
}

impl MarginMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markup => "markup",
            Self::Margin => "margin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "markup" => Some(Self::Markup),
            "margin" => Some(Self::Margin),
            _ => None,
        }
    }
}

/// Per-(vendor, country, quote type) margin configuration. Rows are looked
/// up-or-created on an exact match of the whole tuple, so two quotes with
/// identical margin settings share one row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountryMargin {
    pub id: MarginId,
    pub vendor: String,
    pub country: String,
    pub quote_type: QuoteType,
    pub is_fixed: bool,
    pub value: Decimal,
    pub method: MarginMethod,
}

impl CountryMargin {
    pub fn matches(&self, spec: &MarginSpec) -> bool {
        self.vendor == spec.vendor
            && self.country == spec.country
            && self.quote_type == spec.quote_type
            && self.is_fixed == spec.is_fixed
            && self.value == spec.value
            && self.method == spec.method
    }
}

/// The lookup tuple for find-or-create.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarginSpec {
    pub vendor: String,
    pub country: String,
    pub quote_type: QuoteType,
    pub is_fixed: bool,
    pub value: Decimal,
    pub method: MarginMethod,
}

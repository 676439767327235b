use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::artifacts::FileId;
use crate::domain::quote::{CustomerId, QuoteSnapshot};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractId(pub String);

pub const QUOTE_REFERENCE_PREFIX: &str = "QR";
pub const CONTRACT_REFERENCE_PREFIX: &str = "CN";

/// Contracts carry mappings, files and row groups, never discounts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub customer_id: CustomerId,
    pub number: String,
    pub company: String,
    pub vendor: String,
    pub country: String,
    pub currency_from: String,
    pub currency_to: String,
    pub group_mode: bool,
    pub price_list_file: Option<FileId>,
    pub payment_schedule_file: Option<FileId>,
    pub created_at: DateTime<Utc>,
}

/// Derives the contract number from the customer's quote-reference number by
/// substituting the reference prefix, first occurrence only.
pub fn contract_number(quote_reference: &str) -> String {
    quote_reference.replacen(QUOTE_REFERENCE_PREFIX, CONTRACT_REFERENCE_PREFIX, 1)
}

/// Explicit field projection from a snapshot into contract attributes. Only
/// the fixed known fields cross over; everything else is dropped.
pub fn project_snapshot<S: QuoteSnapshot>(
    snapshot: &S,
    company: &str,
    currency_from: &str,
    currency_to: &str,
) -> ContractFields {
    ContractFields {
        company: company.to_string(),
        vendor: snapshot.vendor().to_string(),
        country: snapshot.country().to_string(),
        currency_from: currency_from.to_string(),
        currency_to: currency_to.to_string(),
        group_mode: snapshot.group_mode(),
        price_list_file: snapshot.price_list_file().cloned(),
        payment_schedule_file: snapshot.payment_schedule_file().cloned(),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContractFields {
    pub company: String,
    pub vendor: String,
    pub country: String,
    pub currency_from: String,
    pub currency_to: String,
    pub group_mode: bool,
    pub price_list_file: Option<FileId>,
    pub payment_schedule_file: Option<FileId>,
}

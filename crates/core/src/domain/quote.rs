use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::artifacts::FileId;
use crate::domain::margin::MarginId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteType {
    New,
    Renewal,
}

impl QuoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Renewal => "renewal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "renewal" => Some(Self::Renewal),
            _ => None,
        }
    }
}

/// Key for the polymorphic attachment tables (discounts, mappings, rows,
/// groups, notes). A quote with no active version is its own snapshot;
/// contracts appear here because they receive replicated mappings, rows and
/// groups, even though they never act as a priceable snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SnapshotRef {
    Quote(QuoteId),
    Version(VersionId),
    Contract(crate::domain::contract::ContractId),
}

impl SnapshotRef {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Quote(_) => "quote",
            Self::Version(_) => "version",
            Self::Contract(_) => "contract",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Quote(id) => &id.0,
            Self::Version(id) => &id.0,
            Self::Contract(id) => &id.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteState {
    Draft,
    Submitted,
    Unravelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub customer_id: CustomerId,
    pub company: String,
    pub vendor: String,
    pub country: String,
    pub quote_type: QuoteType,
    pub active_version: Option<VersionId>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub margin_id: Option<MarginId>,
    pub custom_discount: Option<Decimal>,
    pub buy_price: Decimal,
    pub group_mode: bool,
    pub currency_from: String,
    pub currency_to: String,
    pub price_list_file: Option<FileId>,
    pub payment_schedule_file: Option<FileId>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Quote {
    pub fn state(&self) -> QuoteState {
        if self.submitted_at.is_some() {
            QuoteState::Submitted
        } else {
            QuoteState::Draft
        }
    }

    pub fn can_transition_to(&self, next: QuoteState) -> bool {
        matches!(
            (self.state(), next),
            (QuoteState::Draft, QuoteState::Submitted)
                | (QuoteState::Submitted, QuoteState::Submitted)
                | (QuoteState::Submitted, QuoteState::Unravelled)
        )
    }

    /// Stamps the submission timestamp; re-submitting keeps the original
    /// stamp and reports `false`.
    pub fn submit(&mut self, at: DateTime<Utc>) -> Result<bool, DomainError> {
        if !self.can_transition_to(QuoteState::Submitted) {
            return Err(DomainError::InvalidQuoteTransition {
                from: self.state(),
                to: QuoteState::Submitted,
            });
        }
        if self.submitted_at.is_some() {
            return Ok(false);
        }
        self.submitted_at = Some(at);
        Ok(true)
    }

    /// Clears the submission timestamp, returning the quote to Draft.
    pub fn unravel(&mut self) -> Result<(), DomainError> {
        if !self.can_transition_to(QuoteState::Unravelled) {
            return Err(DomainError::InvalidQuoteTransition {
                from: self.state(),
                to: QuoteState::Unravelled,
            });
        }
        self.submitted_at = None;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteVersion {
    pub id: VersionId,
    pub quote_id: QuoteId,
    pub user_id: UserId,
    pub version_number: u32,
    pub company: String,
    pub vendor: String,
    pub country: String,
    pub quote_type: QuoteType,
    pub margin_id: Option<MarginId>,
    pub custom_discount: Option<Decimal>,
    pub group_mode: bool,
    pub currency_from: String,
    pub currency_to: String,
    pub price_list_file: Option<FileId>,
    pub payment_schedule_file: Option<FileId>,
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Snapshot capability: a quote acting as its own snapshot and a
/// materialized version are interchangeable to every pricing and
/// replication consumer.
pub trait QuoteSnapshot {
    fn snapshot_ref(&self) -> SnapshotRef;
    fn vendor(&self) -> &str;
    fn country(&self) -> &str;
    fn quote_type(&self) -> QuoteType;
    fn margin_id(&self) -> Option<&MarginId>;
    fn custom_discount(&self) -> Option<Decimal>;
    fn group_mode(&self) -> bool;
    fn price_list_file(&self) -> Option<&FileId>;
    fn payment_schedule_file(&self) -> Option<&FileId>;
}

impl QuoteSnapshot for Quote {
    fn snapshot_ref(&self) -> SnapshotRef {
        SnapshotRef::Quote(self.id.clone())
    }

    fn vendor(&self) -> &str {
        &self.vendor
    }

    fn country(&self) -> &str {
        &self.country
    }

    fn quote_type(&self) -> QuoteType {
        self.quote_type
    }

    fn margin_id(&self) -> Option<&MarginId> {
        self.margin_id.as_ref()
    }

    fn custom_discount(&self) -> Option<Decimal> {
        self.custom_discount
    }

    fn group_mode(&self) -> bool {
        self.group_mode
    }

    fn price_list_file(&self) -> Option<&FileId> {
        self.price_list_file.as_ref()
    }

    fn payment_schedule_file(&self) -> Option<&FileId> {
        self.payment_schedule_file.as_ref()
    }
}

impl QuoteSnapshot for QuoteVersion {
    fn snapshot_ref(&self) -> SnapshotRef {
        SnapshotRef::Version(self.id.clone())
    }

    fn vendor(&self) -> &str {
        &self.vendor
    }

    fn country(&self) -> &str {
        &self.country
    }

    fn quote_type(&self) -> QuoteType {
        self.quote_type
    }

    fn margin_id(&self) -> Option<&MarginId> {
        self.margin_id.as_ref()
    }

    fn custom_discount(&self) -> Option<Decimal> {
        self.custom_discount
    }

    fn group_mode(&self) -> bool {
        self.group_mode
    }

    fn price_list_file(&self) -> Option<&FileId> {
        self.price_list_file.as_ref()
    }

    fn payment_schedule_file(&self) -> Option<&FileId> {
        self.payment_schedule_file.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{CustomerId, Quote, QuoteId, QuoteSnapshot, QuoteState, QuoteType, SnapshotRef};

    fn quote() -> Quote {
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
            margin_id: None,
            custom_discount: None,
            buy_price: Decimal::ZERO,
            group_mode: false,
            currency_from: "USD".to_string(),
            currency_to: "EUR".to_string(),
            price_list_file: None,
            payment_schedule_file: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn submit_stamps_timestamp_once() {
        let mut quote = quote();
        assert!(quote.submit(Utc::now()).expect("draft -> submitted"));
        let first = quote.submitted_at;
        assert!(!quote.submit(Utc::now()).expect("resubmit is a no-op"));
        assert_eq!(quote.submitted_at, first);
        assert_eq!(quote.state(), QuoteState::Submitted);
    }

    #[test]
    fn unravel_requires_submission() {
        let mut quote = quote();
        let error = quote.unravel().expect_err("draft cannot be unravelled");
        assert!(matches!(
            error,
            crate::errors::DomainError::InvalidQuoteTransition {
                from: QuoteState::Draft,
                to: QuoteState::Unravelled
            }
        ));

        quote.submit(Utc::now()).expect("submit");
        quote.unravel().expect("submitted -> unravelled");
        assert_eq!(quote.state(), QuoteState::Draft);
    }

    #[test]
    fn quote_is_its_own_snapshot_when_no_version_is_active() {
        let quote = quote();
        assert_eq!(quote.snapshot_ref(), SnapshotRef::Quote(quote.id.clone()));
        assert_eq!(quote.snapshot_ref().kind(), "quote");
        assert_eq!(quote.snapshot_ref().id(), "q-1");
    }
}

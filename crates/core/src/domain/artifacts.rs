use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::{SnapshotRef, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    PriceList,
    PaymentSchedule,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceList => "price_list",
            Self::PaymentSchedule => "payment_schedule",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "price_list" => Some(Self::PriceList),
            "payment_schedule" => Some(Self::PaymentSchedule),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteFile {
    pub id: FileId,
    pub kind: FileKind,
    pub name: String,
    pub path: String,
    /// Parsed payment-schedule payload; only schedules carry one.
    pub schedule_data: Option<serde_json::Value>,
    pub uploaded_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// One imported price-list row. Replicated rows keep a back-reference to the
/// row they were copied from so group membership can be remapped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteRow {
    pub id: RowId,
    pub snapshot: SnapshotRef,
    pub replicated_row_id: Option<RowId>,
    pub product: String,
    pub buy_price: Decimal,
    pub list_price: Decimal,
    pub quantity: u32,
    pub selected: bool,
}

/// Named subset of row ids, used when group-display mode is enabled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowsGroup {
    pub id: GroupId,
    pub snapshot: SnapshotRef,
    pub name: String,
    pub rows_ids: Vec<RowId>,
    pub sort: i32,
}

/// Per-snapshot association of a template field to an importable column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldColumnMapping {
    pub snapshot: SnapshotRef,
    pub field: String,
    pub column: String,
    pub is_default_enabled: bool,
    pub is_preview_visible: bool,
    pub sort: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub author: UserId,
    pub body: String,
    pub from_entity_wizard: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::FileKind;

    #[test]
    fn file_kind_round_trips_through_storage_strings() {
        for kind in [FileKind::PriceList, FileKind::PaymentSchedule] {
            assert_eq!(FileKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FileKind::parse("invoice"), None);
    }
}

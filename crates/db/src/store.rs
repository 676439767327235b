use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use quotient_core::{
    Contract, CountryMargin, CustomerId, Discount, DiscountCandidate, EngineError, FileId,
    FileKind, GroupId, MarginId, MarginMethod, MarginSpec, Note, NoteId, Quote, QuoteFile,
    QuoteId, QuoteRow, QuoteSnapshot, QuoteType, QuoteVersion, RowId, RowsGroup, SnapshotRef,
    UserId, VersionId,
};

pub(crate) fn db_err(error: sqlx::Error) -> EngineError {
    EngineError::Persistence(format!("database error: {error}"))
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn parse_decimal(field: &str, value: &str) -> Result<Decimal, EngineError> {
    Decimal::from_str(value)
        .map_err(|error| EngineError::Persistence(format!("invalid decimal for {field}: {error}")))
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| {
            EngineError::Persistence(format!("invalid timestamp for {field}: {error}"))
        })
}

fn opt_decimal(field: &str, value: Option<String>) -> Result<Option<Decimal>, EngineError> {
    value.map(|value| parse_decimal(field, &value)).transpose()
}

fn opt_timestamp(field: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>, EngineError> {
    value.map(|value| parse_timestamp(field, &value)).transpose()
}

fn quote_type_from(value: &str) -> Result<QuoteType, EngineError> {
    QuoteType::parse(value)
        .ok_or_else(|| EngineError::Persistence(format!("unknown quote_type `{value}`")))
}

// --- quotes ---------------------------------------------------------------

fn quote_from_row(row: &SqliteRow) -> Result<Quote, EngineError> {
    let quote_type: String = row.try_get("quote_type").map_err(db_err)?;
    Ok(Quote {
        id: QuoteId(row.try_get("id").map_err(db_err)?),
        customer_id: CustomerId(row.try_get("customer_id").map_err(db_err)?),
        company: row.try_get("company").map_err(db_err)?,
        vendor: row.try_get("vendor").map_err(db_err)?,
        country: row.try_get("country").map_err(db_err)?,
        quote_type: quote_type_from(&quote_type)?,
        active_version: row
            .try_get::<Option<String>, _>("active_version_id")
            .map_err(db_err)?
            .map(VersionId),
        submitted_at: opt_timestamp(
            "submitted_at",
            row.try_get("submitted_at").map_err(db_err)?,
        )?,
        activated_at: opt_timestamp(
            "activated_at",
            row.try_get("activated_at").map_err(db_err)?,
        )?,
        margin_id: row.try_get::<Option<String>, _>("margin_id").map_err(db_err)?.map(MarginId),
        custom_discount: opt_decimal(
            "custom_discount",
            row.try_get("custom_discount").map_err(db_err)?,
        )?,
        buy_price: parse_decimal("buy_price", &row.try_get::<String, _>("buy_price").map_err(db_err)?)?,
        group_mode: row.try_get::<i64, _>("group_mode").map_err(db_err)? != 0,
        currency_from: row.try_get("currency_from").map_err(db_err)?,
        currency_to: row.try_get("currency_to").map_err(db_err)?,
        price_list_file: row
            .try_get::<Option<String>, _>("price_list_file_id")
            .map_err(db_err)?
            .map(FileId),
        payment_schedule_file: row
            .try_get::<Option<String>, _>("payment_schedule_file_id")
            .map_err(db_err)?
            .map(FileId),
        created_at: parse_timestamp(
            "created_at",
            &row.try_get::<String, _>("created_at").map_err(db_err)?,
        )?,
        deleted_at: opt_timestamp("deleted_at", row.try_get("deleted_at").map_err(db_err)?)?,
    })
}

pub(crate) async fn load_quote(
    conn: &mut SqliteConnection,
    id: &QuoteId,
) -> Result<Quote, EngineError> {
    let row = sqlx::query("SELECT * FROM quote WHERE id = ? AND deleted_at IS NULL")
        .bind(&id.0)
        .fetch_optional(conn)
        .await
        .map_err(db_err)?;
    let row = row.ok_or_else(|| EngineError::not_found("quote", id.0.clone()))?;
    quote_from_row(&row)
}

pub(crate) async fn insert_quote(
    conn: &mut SqliteConnection,
    quote: &Quote,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO quote (
            id, customer_id, company, vendor, country, quote_type,
            active_version_id, submitted_at, activated_at, margin_id,
            custom_discount, buy_price, group_mode, currency_from, currency_to,
            price_list_file_id, payment_schedule_file_id, created_at, deleted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&quote.id.0)
    .bind(&quote.customer_id.0)
    .bind(&quote.company)
    .bind(&quote.vendor)
    .bind(&quote.country)
    .bind(quote.quote_type.as_str())
    .bind(quote.active_version.as_ref().map(|id| id.0.clone()))
    .bind(quote.submitted_at.map(|at| at.to_rfc3339()))
    .bind(quote.activated_at.map(|at| at.to_rfc3339()))
    .bind(quote.margin_id.as_ref().map(|id| id.0.clone()))
    .bind(quote.custom_discount.map(|value| value.to_string()))
    .bind(quote.buy_price.to_string())
    .bind(quote.group_mode as i64)
    .bind(&quote.currency_from)
    .bind(&quote.currency_to)
    .bind(quote.price_list_file.as_ref().map(|id| id.0.clone()))
    .bind(quote.payment_schedule_file.as_ref().map(|id| id.0.clone()))
    .bind(quote.created_at.to_rfc3339())
    .bind(quote.deleted_at.map(|at| at.to_rfc3339()))
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(crate) async fn update_quote(
    conn: &mut SqliteConnection,
    quote: &Quote,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        UPDATE quote SET
            company = ?, vendor = ?, country = ?, quote_type = ?,
            active_version_id = ?, submitted_at = ?, activated_at = ?,
            margin_id = ?, custom_discount = ?, buy_price = ?, group_mode = ?,
            currency_from = ?, currency_to = ?,
            price_list_file_id = ?, payment_schedule_file_id = ?, deleted_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&quote.company)
    .bind(&quote.vendor)
    .bind(&quote.country)
    .bind(quote.quote_type.as_str())
    .bind(quote.active_version.as_ref().map(|id| id.0.clone()))
    .bind(quote.submitted_at.map(|at| at.to_rfc3339()))
    .bind(quote.activated_at.map(|at| at.to_rfc3339()))
    .bind(quote.margin_id.as_ref().map(|id| id.0.clone()))
    .bind(quote.custom_discount.map(|value| value.to_string()))
    .bind(quote.buy_price.to_string())
    .bind(quote.group_mode as i64)
    .bind(&quote.currency_from)
    .bind(&quote.currency_to)
    .bind(quote.price_list_file.as_ref().map(|id| id.0.clone()))
    .bind(quote.payment_schedule_file.as_ref().map(|id| id.0.clone()))
    .bind(quote.deleted_at.map(|at| at.to_rfc3339()))
    .bind(&quote.id.0)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(crate) async fn deactivate_quote(
    conn: &mut SqliteConnection,
    id: &QuoteId,
) -> Result<(), EngineError> {
    sqlx::query("UPDATE quote SET activated_at = NULL WHERE id = ?")
        .bind(&id.0)
        .execute(conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

// --- versions -------------------------------------------------------------

fn version_from_row(row: &SqliteRow) -> Result<QuoteVersion, EngineError> {
    let quote_type: String = row.try_get("quote_type").map_err(db_err)?;
    let version_number: i64 = row.try_get("version_number").map_err(db_err)?;
    Ok(QuoteVersion {
        id: VersionId(row.try_get("id").map_err(db_err)?),
        quote_id: QuoteId(row.try_get("quote_id").map_err(db_err)?),
        user_id: UserId(row.try_get("user_id").map_err(db_err)?),
        version_number: u32::try_from(version_number).map_err(|_| {
            EngineError::Persistence(format!("version_number `{version_number}` out of range"))
        })?,
        company: row.try_get("company").map_err(db_err)?,
        vendor: row.try_get("vendor").map_err(db_err)?,
        country: row.try_get("country").map_err(db_err)?,
        quote_type: quote_type_from(&quote_type)?,
        margin_id: row.try_get::<Option<String>, _>("margin_id").map_err(db_err)?.map(MarginId),
        custom_discount: opt_decimal(
            "custom_discount",
            row.try_get("custom_discount").map_err(db_err)?,
        )?,
        group_mode: row.try_get::<i64, _>("group_mode").map_err(db_err)? != 0,
        currency_from: row.try_get("currency_from").map_err(db_err)?,
        currency_to: row.try_get("currency_to").map_err(db_err)?,
        price_list_file: row
            .try_get::<Option<String>, _>("price_list_file_id")
            .map_err(db_err)?
            .map(FileId),
        payment_schedule_file: row
            .try_get::<Option<String>, _>("payment_schedule_file_id")
            .map_err(db_err)?
            .map(FileId),
        is_complete: row.try_get::<i64, _>("is_complete").map_err(db_err)? != 0,
        created_at: parse_timestamp(
            "created_at",
            &row.try_get::<String, _>("created_at").map_err(db_err)?,
        )?,
        deleted_at: opt_timestamp("deleted_at", row.try_get("deleted_at").map_err(db_err)?)?,
    })
}

pub(crate) async fn load_version(
    conn: &mut SqliteConnection,
    id: &VersionId,
) -> Result<QuoteVersion, EngineError> {
    let row = sqlx::query("SELECT * FROM quote_version WHERE id = ? AND deleted_at IS NULL")
        .bind(&id.0)
        .fetch_optional(conn)
        .await
        .map_err(db_err)?;
    let row = row.ok_or_else(|| EngineError::not_found("quote_version", id.0.clone()))?;
    version_from_row(&row)
}

pub(crate) async fn insert_version(
    conn: &mut SqliteConnection,
    version: &QuoteVersion,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO quote_version (
            id, quote_id, user_id, version_number, company, vendor, country,
            quote_type, margin_id, custom_discount, group_mode, currency_from,
            currency_to, price_list_file_id, payment_schedule_file_id,
            is_complete, created_at, deleted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&version.id.0)
    .bind(&version.quote_id.0)
    .bind(&version.user_id.0)
    .bind(i64::from(version.version_number))
    .bind(&version.company)
    .bind(&version.vendor)
    .bind(&version.country)
    .bind(version.quote_type.as_str())
    .bind(version.margin_id.as_ref().map(|id| id.0.clone()))
    .bind(version.custom_discount.map(|value| value.to_string()))
    .bind(version.group_mode as i64)
    .bind(&version.currency_from)
    .bind(&version.currency_to)
    .bind(version.price_list_file.as_ref().map(|id| id.0.clone()))
    .bind(version.payment_schedule_file.as_ref().map(|id| id.0.clone()))
    .bind(version.is_complete as i64)
    .bind(version.created_at.to_rfc3339())
    .bind(version.deleted_at.map(|at| at.to_rfc3339()))
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(crate) async fn update_version(
    conn: &mut SqliteConnection,
    version: &QuoteVersion,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        UPDATE quote_version SET
            company = ?, vendor = ?, country = ?, quote_type = ?, margin_id = ?,
            custom_discount = ?, group_mode = ?, currency_from = ?, currency_to = ?,
            price_list_file_id = ?, payment_schedule_file_id = ?, is_complete = ?
        WHERE id = ?
        "#,
    )
    .bind(&version.company)
    .bind(&version.vendor)
    .bind(&version.country)
    .bind(version.quote_type.as_str())
    .bind(version.margin_id.as_ref().map(|id| id.0.clone()))
    .bind(version.custom_discount.map(|value| value.to_string()))
    .bind(version.group_mode as i64)
    .bind(&version.currency_from)
    .bind(&version.currency_to)
    .bind(version.price_list_file.as_ref().map(|id| id.0.clone()))
    .bind(version.payment_schedule_file.as_ref().map(|id| id.0.clone()))
    .bind(version.is_complete as i64)
    .bind(&version.id.0)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(crate) async fn next_version_number(
    conn: &mut SqliteConnection,
    quote_id: &QuoteId,
) -> Result<u32, EngineError> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version_number) FROM quote_version WHERE quote_id = ?")
            .bind(&quote_id.0)
            .fetch_one(conn)
            .await
            .map_err(db_err)?;
    Ok(u32::try_from(max.unwrap_or(0)).unwrap_or(0) + 1)
}

/// The resolved authoritative snapshot: the active version when the pointer
/// is set, otherwise the quote itself.
#[derive(Clone, Debug)]
pub enum ActiveSnapshot {
    Quote(Quote),
    Version(QuoteVersion),
}

impl ActiveSnapshot {
    /// The owning editor, when the snapshot has one. Quotes acting as their
    /// own snapshot are editable by anyone without forcing a new version.
    pub fn owner(&self) -> Option<&UserId> {
        match self {
            Self::Quote(_) => None,
            Self::Version(version) => Some(&version.user_id),
        }
    }
}

impl QuoteSnapshot for ActiveSnapshot {
    fn snapshot_ref(&self) -> SnapshotRef {
        match self {
            Self::Quote(quote) => quote.snapshot_ref(),
            Self::Version(version) => version.snapshot_ref(),
        }
    }

    fn vendor(&self) -> &str {
        match self {
            Self::Quote(quote) => quote.vendor(),
            Self::Version(version) => version.vendor(),
        }
    }

    fn country(&self) -> &str {
        match self {
            Self::Quote(quote) => quote.country(),
            Self::Version(version) => version.country(),
        }
    }

    fn quote_type(&self) -> QuoteType {
        match self {
            Self::Quote(quote) => quote.quote_type(),
            Self::Version(version) => version.quote_type(),
        }
    }

    fn margin_id(&self) -> Option<&MarginId> {
        match self {
            Self::Quote(quote) => quote.margin_id(),
            Self::Version(version) => version.margin_id(),
        }
    }

    fn custom_discount(&self) -> Option<Decimal> {
        match self {
            Self::Quote(quote) => quote.custom_discount(),
            Self::Version(version) => version.custom_discount(),
        }
    }

    fn group_mode(&self) -> bool {
        match self {
            Self::Quote(quote) => quote.group_mode(),
            Self::Version(version) => version.group_mode(),
        }
    }

    fn price_list_file(&self) -> Option<&FileId> {
        match self {
            Self::Quote(quote) => quote.price_list_file(),
            Self::Version(version) => version.price_list_file(),
        }
    }

    fn payment_schedule_file(&self) -> Option<&FileId> {
        match self {
            Self::Quote(quote) => quote.payment_schedule_file(),
            Self::Version(version) => version.payment_schedule_file(),
        }
    }
}

pub(crate) async fn load_active_snapshot(
    conn: &mut SqliteConnection,
    quote: &Quote,
) -> Result<ActiveSnapshot, EngineError> {
    match &quote.active_version {
        Some(version_id) => Ok(ActiveSnapshot::Version(load_version(conn, version_id).await?)),
        None => Ok(ActiveSnapshot::Quote(quote.clone())),
    }
}

// --- files ----------------------------------------------------------------

fn file_from_row(row: &SqliteRow) -> Result<QuoteFile, EngineError> {
    let kind: String = row.try_get("kind").map_err(db_err)?;
    let schedule_json: Option<String> = row.try_get("schedule_data_json").map_err(db_err)?;
    let schedule_data = schedule_json
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|error| {
                EngineError::Persistence(format!("invalid schedule_data_json: {error}"))
            })
        })
        .transpose()?;
    Ok(QuoteFile {
        id: FileId(row.try_get("id").map_err(db_err)?),
        kind: FileKind::parse(&kind)
            .ok_or_else(|| EngineError::Persistence(format!("unknown file kind `{kind}`")))?,
        name: row.try_get("name").map_err(db_err)?,
        path: row.try_get("path").map_err(db_err)?,
        schedule_data,
        uploaded_by: UserId(row.try_get("uploaded_by").map_err(db_err)?),
        created_at: parse_timestamp(
            "created_at",
            &row.try_get::<String, _>("created_at").map_err(db_err)?,
        )?,
    })
}

pub(crate) async fn load_file(
    conn: &mut SqliteConnection,
    id: &FileId,
) -> Result<QuoteFile, EngineError> {
    let row = sqlx::query("SELECT * FROM quote_file WHERE id = ?")
        .bind(&id.0)
        .fetch_optional(conn)
        .await
        .map_err(db_err)?;
    let row = row.ok_or_else(|| EngineError::not_found("quote_file", id.0.clone()))?;
    file_from_row(&row)
}

pub(crate) async fn insert_file(
    conn: &mut SqliteConnection,
    file: &QuoteFile,
) -> Result<(), EngineError> {
    let schedule_json = file
        .schedule_data
        .as_ref()
        .map(|data| {
            serde_json::to_string(data).map_err(|error| {
                EngineError::Persistence(format!("could not encode schedule data: {error}"))
            })
        })
        .transpose()?;
    sqlx::query(
        r#"
        INSERT INTO quote_file (id, kind, name, path, schedule_data_json, uploaded_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&file.id.0)
    .bind(file.kind.as_str())
    .bind(&file.name)
    .bind(&file.path)
    .bind(schedule_json)
    .bind(&file.uploaded_by.0)
    .bind(file.created_at.to_rfc3339())
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Points a snapshot's file column of the given kind at a file record. The
/// target table depends on the snapshot kind.
pub(crate) async fn set_snapshot_file(
    conn: &mut SqliteConnection,
    snapshot: &SnapshotRef,
    kind: FileKind,
    file: Option<&FileId>,
) -> Result<(), EngineError> {
    let table = match snapshot {
        SnapshotRef::Quote(_) => "quote",
        SnapshotRef::Version(_) => "quote_version",
        SnapshotRef::Contract(_) => "contract",
    };
    let column = match kind {
        FileKind::PriceList => "price_list_file_id",
        FileKind::PaymentSchedule => "payment_schedule_file_id",
    };
    let sql = format!("UPDATE {table} SET {column} = ? WHERE id = ?");
    sqlx::query(&sql)
        .bind(file.map(|id| id.0.clone()))
        .bind(snapshot.id())
        .execute(conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

// --- margins --------------------------------------------------------------

fn margin_from_row(row: &SqliteRow) -> Result<CountryMargin, EngineError> {
    let quote_type: String = row.try_get("quote_type").map_err(db_err)?;
    let method: String = row.try_get("method").map_err(db_err)?;
    Ok(CountryMargin {
        id: MarginId(row.try_get("id").map_err(db_err)?),
        vendor: row.try_get("vendor").map_err(db_err)?,
        country: row.try_get("country").map_err(db_err)?,
        quote_type: quote_type_from(&quote_type)?,
        is_fixed: row.try_get::<i64, _>("is_fixed").map_err(db_err)? != 0,
        value: parse_decimal("value", &row.try_get::<String, _>("value").map_err(db_err)?)?,
        method: MarginMethod::parse(&method)
            .ok_or_else(|| EngineError::Persistence(format!("unknown margin method `{method}`")))?,
    })
}

pub(crate) async fn load_margin(
    conn: &mut SqliteConnection,
    id: &MarginId,
) -> Result<CountryMargin, EngineError> {
    let row = sqlx::query("SELECT * FROM country_margin WHERE id = ?")
        .bind(&id.0)
        .fetch_optional(conn)
        .await
        .map_err(db_err)?;
    let row = row.ok_or_else(|| EngineError::not_found("country_margin", id.0.clone()))?;
    margin_from_row(&row)
}

/// Exact-tuple lookup; creates the row when no match exists so identical
/// margin configurations share one record.
pub(crate) async fn find_or_create_margin(
    conn: &mut SqliteConnection,
    spec: &MarginSpec,
) -> Result<CountryMargin, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT * FROM country_margin
        WHERE vendor = ? AND country = ? AND quote_type = ?
          AND is_fixed = ? AND value = ? AND method = ?
        LIMIT 1
        "#,
    )
    .bind(&spec.vendor)
    .bind(&spec.country)
    .bind(spec.quote_type.as_str())
    .bind(spec.is_fixed as i64)
    .bind(spec.value.to_string())
    .bind(spec.method.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;

    if let Some(row) = row {
        return margin_from_row(&row);
    }

    let margin = CountryMargin {
        id: MarginId(new_id()),
        vendor: spec.vendor.clone(),
        country: spec.country.clone(),
        quote_type: spec.quote_type,
        is_fixed: spec.is_fixed,
        value: spec.value,
        method: spec.method,
    };
    sqlx::query(
        r#"
        INSERT INTO country_margin (id, vendor, country, quote_type, is_fixed, value, method)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&margin.id.0)
    .bind(&margin.vendor)
    .bind(&margin.country)
    .bind(margin.quote_type.as_str())
    .bind(margin.is_fixed as i64)
    .bind(margin.value.to_string())
    .bind(margin.method.as_str())
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(margin)
}

// --- discounts ------------------------------------------------------------

fn discount_from_row(row: &SqliteRow) -> Result<Discount, EngineError> {
    let quote_type: String = row.try_get("quote_type").map_err(db_err)?;
    let kind: String = row.try_get("kind").map_err(db_err)?;
    let method_json: String = row.try_get("method_json").map_err(db_err)?;
    Ok(Discount {
        id: quotient_core::DiscountId(row.try_get("id").map_err(db_err)?),
        kind: quotient_core::DiscountKind::parse(&kind)
            .ok_or_else(|| EngineError::Persistence(format!("unknown discount kind `{kind}`")))?,
        name: row.try_get("name").map_err(db_err)?,
        method: serde_json::from_str(&method_json).map_err(|error| {
            EngineError::Persistence(format!("invalid discount method_json: {error}"))
        })?,
        value: parse_decimal("value", &row.try_get::<String, _>("value").map_err(db_err)?)?,
        vendor: row.try_get("vendor").map_err(db_err)?,
        country: row.try_get("country").map_err(db_err)?,
        quote_type: quote_type_from(&quote_type)?,
        activated: row.try_get::<i64, _>("activated").map_err(db_err)? != 0,
    })
}

/// Loads the persisted attachment set for a snapshot as resolver candidates.
pub(crate) async fn attached_candidates(
    conn: &mut SqliteConnection,
    snapshot: &SnapshotRef,
) -> Result<Vec<DiscountCandidate>, EngineError> {
    let rows = sqlx::query(
        r#"
        SELECT d.*, a.duration, a.sort AS attachment_sort
        FROM discount_attachment a
        JOIN discount d ON d.id = a.discount_id
        WHERE a.snapshot_kind = ? AND a.snapshot_id = ?
        ORDER BY a.sort ASC
        "#,
    )
    .bind(snapshot.kind())
    .bind(snapshot.id())
    .fetch_all(conn)
    .await
    .map_err(db_err)?;

    let mut candidates = Vec::with_capacity(rows.len());
    for row in rows {
        let duration: Option<i64> = row.try_get("duration").map_err(db_err)?;
        let sort: i64 = row.try_get("attachment_sort").map_err(db_err)?;
        candidates.push(DiscountCandidate {
            discount: discount_from_row(&row)?,
            duration: duration.and_then(|value| u32::try_from(value).ok()),
            sort: i32::try_from(sort).unwrap_or(0),
        });
    }
    Ok(candidates)
}

// --- rows -----------------------------------------------------------------

fn quote_row_from_row(row: &SqliteRow) -> Result<QuoteRow, EngineError> {
    let quantity: i64 = row.try_get("quantity").map_err(db_err)?;
    Ok(QuoteRow {
        id: RowId(row.try_get("id").map_err(db_err)?),
        snapshot: snapshot_ref_from_columns(
            &row.try_get::<String, _>("snapshot_kind").map_err(db_err)?,
            row.try_get::<String, _>("snapshot_id").map_err(db_err)?,
        )?,
        replicated_row_id: row
            .try_get::<Option<String>, _>("replicated_row_id")
            .map_err(db_err)?
            .map(RowId),
        product: row.try_get("product").map_err(db_err)?,
        buy_price: parse_decimal(
            "buy_price",
            &row.try_get::<String, _>("buy_price").map_err(db_err)?,
        )?,
        list_price: parse_decimal(
            "list_price",
            &row.try_get::<String, _>("list_price").map_err(db_err)?,
        )?,
        quantity: u32::try_from(quantity).unwrap_or(0),
        selected: row.try_get::<i64, _>("selected").map_err(db_err)? != 0,
    })
}

pub(crate) fn snapshot_ref_from_columns(
    kind: &str,
    id: String,
) -> Result<SnapshotRef, EngineError> {
    match kind {
        "quote" => Ok(SnapshotRef::Quote(QuoteId(id))),
        "version" => Ok(SnapshotRef::Version(VersionId(id))),
        "contract" => Ok(SnapshotRef::Contract(quotient_core::ContractId(id))),
        other => Err(EngineError::Persistence(format!("unknown snapshot kind `{other}`"))),
    }
}

pub(crate) async fn load_rows(
    conn: &mut SqliteConnection,
    snapshot: &SnapshotRef,
) -> Result<Vec<QuoteRow>, EngineError> {
    let rows = sqlx::query(
        "SELECT * FROM quote_row WHERE snapshot_kind = ? AND snapshot_id = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(snapshot.kind())
    .bind(snapshot.id())
    .fetch_all(conn)
    .await
    .map_err(db_err)?;
    rows.iter().map(quote_row_from_row).collect()
}

pub(crate) async fn insert_row(
    conn: &mut SqliteConnection,
    row: &QuoteRow,
    created_at: DateTime<Utc>,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO quote_row (
            id, snapshot_kind, snapshot_id, replicated_row_id, product,
            buy_price, list_price, quantity, selected, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.id.0)
    .bind(row.snapshot.kind())
    .bind(row.snapshot.id())
    .bind(row.replicated_row_id.as_ref().map(|id| id.0.clone()))
    .bind(&row.product)
    .bind(row.buy_price.to_string())
    .bind(row.list_price.to_string())
    .bind(i64::from(row.quantity))
    .bind(row.selected as i64)
    .bind(created_at.to_rfc3339())
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Marks exactly the given rows selected and every other snapshot row
/// unselected.
pub(crate) async fn apply_row_selection(
    conn: &mut SqliteConnection,
    snapshot: &SnapshotRef,
    selected: &[RowId],
) -> Result<(), EngineError> {
    sqlx::query("UPDATE quote_row SET selected = 0 WHERE snapshot_kind = ? AND snapshot_id = ?")
        .bind(snapshot.kind())
        .bind(snapshot.id())
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    for row_id in selected {
        sqlx::query(
            "UPDATE quote_row SET selected = 1 WHERE id = ? AND snapshot_kind = ? AND snapshot_id = ?",
        )
        .bind(&row_id.0)
        .bind(snapshot.kind())
        .bind(snapshot.id())
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

// --- groups ---------------------------------------------------------------

fn group_from_row(row: &SqliteRow) -> Result<RowsGroup, EngineError> {
    let rows_ids_json: String = row.try_get("rows_ids_json").map_err(db_err)?;
    let rows_ids: Vec<String> = serde_json::from_str(&rows_ids_json)
        .map_err(|error| EngineError::Persistence(format!("invalid rows_ids_json: {error}")))?;
    let sort: i64 = row.try_get("sort").map_err(db_err)?;
    Ok(RowsGroup {
        id: GroupId(row.try_get("id").map_err(db_err)?),
        snapshot: snapshot_ref_from_columns(
            &row.try_get::<String, _>("snapshot_kind").map_err(db_err)?,
            row.try_get::<String, _>("snapshot_id").map_err(db_err)?,
        )?,
        name: row.try_get("name").map_err(db_err)?,
        rows_ids: rows_ids.into_iter().map(RowId).collect(),
        sort: i32::try_from(sort).unwrap_or(0),
    })
}

pub(crate) async fn load_groups(
    conn: &mut SqliteConnection,
    snapshot: &SnapshotRef,
) -> Result<Vec<RowsGroup>, EngineError> {
    let rows = sqlx::query(
        "SELECT * FROM rows_group WHERE snapshot_kind = ? AND snapshot_id = ? ORDER BY sort ASC, id ASC",
    )
    .bind(snapshot.kind())
    .bind(snapshot.id())
    .fetch_all(conn)
    .await
    .map_err(db_err)?;
    rows.iter().map(group_from_row).collect()
}

pub(crate) async fn insert_group(
    conn: &mut SqliteConnection,
    group: &RowsGroup,
) -> Result<(), EngineError> {
    let rows_ids: Vec<&str> = group.rows_ids.iter().map(|id| id.0.as_str()).collect();
    let rows_ids_json = serde_json::to_string(&rows_ids)
        .map_err(|error| EngineError::Persistence(format!("could not encode rows_ids: {error}")))?;
    sqlx::query(
        r#"
        INSERT INTO rows_group (id, snapshot_kind, snapshot_id, name, rows_ids_json, sort)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&group.id.0)
    .bind(group.snapshot.kind())
    .bind(group.snapshot.id())
    .bind(&group.name)
    .bind(rows_ids_json)
    .bind(i64::from(group.sort))
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(crate) async fn delete_groups(
    conn: &mut SqliteConnection,
    snapshot: &SnapshotRef,
) -> Result<(), EngineError> {
    sqlx::query("DELETE FROM rows_group WHERE snapshot_kind = ? AND snapshot_id = ?")
        .bind(snapshot.kind())
        .bind(snapshot.id())
        .execute(conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

// --- field-column mappings ------------------------------------------------

pub(crate) async fn upsert_mapping(
    conn: &mut SqliteConnection,
    mapping: &quotient_core::FieldColumnMapping,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO field_column (
            snapshot_kind, snapshot_id, field, column_name,
            is_default_enabled, is_preview_visible, sort
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (snapshot_kind, snapshot_id, field) DO UPDATE SET
            column_name = excluded.column_name,
            is_default_enabled = excluded.is_default_enabled,
            is_preview_visible = excluded.is_preview_visible,
            sort = excluded.sort
        "#,
    )
    .bind(mapping.snapshot.kind())
    .bind(mapping.snapshot.id())
    .bind(&mapping.field)
    .bind(&mapping.column)
    .bind(mapping.is_default_enabled as i64)
    .bind(mapping.is_preview_visible as i64)
    .bind(i64::from(mapping.sort))
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(crate) async fn delete_mappings(
    conn: &mut SqliteConnection,
    snapshot: &SnapshotRef,
) -> Result<(), EngineError> {
    sqlx::query("DELETE FROM field_column WHERE snapshot_kind = ? AND snapshot_id = ?")
        .bind(snapshot.kind())
        .bind(snapshot.id())
        .execute(conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

pub(crate) async fn hide_columns(
    conn: &mut SqliteConnection,
    snapshot: &SnapshotRef,
    hidden: &[String],
) -> Result<(), EngineError> {
    for column in hidden {
        sqlx::query(
            "UPDATE field_column SET is_preview_visible = 0 WHERE snapshot_kind = ? AND snapshot_id = ? AND column_name = ?",
        )
        .bind(snapshot.kind())
        .bind(snapshot.id())
        .bind(column)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

// --- notes ----------------------------------------------------------------

fn note_from_row(row: &SqliteRow) -> Result<Note, EngineError> {
    Ok(Note {
        id: NoteId(row.try_get("id").map_err(db_err)?),
        author: UserId(row.try_get("author_id").map_err(db_err)?),
        body: row.try_get("body").map_err(db_err)?,
        from_entity_wizard: row.try_get::<i64, _>("from_entity_wizard").map_err(db_err)? != 0,
        created_at: parse_timestamp(
            "created_at",
            &row.try_get::<String, _>("created_at").map_err(db_err)?,
        )?,
    })
}

pub(crate) async fn attached_note(
    conn: &mut SqliteConnection,
    snapshot: &SnapshotRef,
) -> Result<Option<Note>, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT n.* FROM note n
        JOIN note_attachment a ON a.note_id = n.id
        WHERE a.snapshot_kind = ? AND a.snapshot_id = ?
        ORDER BY n.created_at DESC
        LIMIT 1
        "#,
    )
    .bind(snapshot.kind())
    .bind(snapshot.id())
    .fetch_optional(conn)
    .await
    .map_err(db_err)?;
    row.as_ref().map(note_from_row).transpose()
}

pub(crate) async fn insert_note(
    conn: &mut SqliteConnection,
    note: &Note,
) -> Result<(), EngineError> {
    sqlx::query(
        "INSERT INTO note (id, author_id, body, from_entity_wizard, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&note.id.0)
    .bind(&note.author.0)
    .bind(&note.body)
    .bind(note.from_entity_wizard as i64)
    .bind(note.created_at.to_rfc3339())
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(crate) async fn attach_note(
    conn: &mut SqliteConnection,
    note_id: &NoteId,
    snapshot: &SnapshotRef,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO note_attachment (note_id, snapshot_kind, snapshot_id)
        VALUES (?, ?, ?)
        ON CONFLICT (note_id, snapshot_kind, snapshot_id) DO NOTHING
        "#,
    )
    .bind(&note_id.0)
    .bind(snapshot.kind())
    .bind(snapshot.id())
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(crate) async fn update_note_body(
    conn: &mut SqliteConnection,
    note_id: &NoteId,
    body: &str,
) -> Result<(), EngineError> {
    sqlx::query("UPDATE note SET body = ? WHERE id = ?")
        .bind(body)
        .bind(&note_id.0)
        .execute(conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

// --- customers / contracts ------------------------------------------------

pub(crate) async fn customer_quote_reference(
    conn: &mut SqliteConnection,
    customer_id: &CustomerId,
) -> Result<String, EngineError> {
    let reference: Option<String> =
        sqlx::query_scalar("SELECT quote_reference FROM customer WHERE id = ?")
            .bind(&customer_id.0)
            .fetch_optional(conn)
            .await
            .map_err(db_err)?;
    reference.ok_or_else(|| EngineError::not_found("customer", customer_id.0.clone()))
}

pub(crate) async fn insert_contract(
    conn: &mut SqliteConnection,
    contract: &Contract,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO contract (
            id, customer_id, number, company, vendor, country,
            currency_from, currency_to, group_mode,
            price_list_file_id, payment_schedule_file_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&contract.id.0)
    .bind(&contract.customer_id.0)
    .bind(&contract.number)
    .bind(&contract.company)
    .bind(&contract.vendor)
    .bind(&contract.country)
    .bind(&contract.currency_from)
    .bind(&contract.currency_to)
    .bind(contract.group_mode as i64)
    .bind(contract.price_list_file.as_ref().map(|id| id.0.clone()))
    .bind(contract.payment_schedule_file.as_ref().map(|id| id.0.clone()))
    .bind(contract.created_at.to_rfc3339())
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

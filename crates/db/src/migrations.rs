use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "customer",
        "quote",
        "quote_version",
        "quote_row",
        "rows_group",
        "discount",
        "discount_attachment",
        "country_margin",
        "field_column",
        "quote_file",
        "note",
        "note_attachment",
        "contract",
        "idx_quote_customer_id",
        "idx_quote_version_quote_id",
        "idx_quote_row_snapshot",
        "idx_quote_row_replicated",
        "idx_rows_group_snapshot",
        "idx_discount_scope",
        "idx_discount_attachment_snapshot",
        "idx_field_column_snapshot",
        "idx_note_attachment_snapshot",
        "idx_contract_customer_id",
    ];

    #[tokio::test]
    async fn migrations_create_every_managed_object() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for name in MANAGED_SCHEMA_OBJECTS {
            let row = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master WHERE name = ? AND type IN ('table', 'index')",
            )
            .bind(name)
            .fetch_one(&pool)
            .await
            .expect("query sqlite_master");
            let count: i64 = row.try_get("count").expect("count");
            assert_eq!(count, 1, "missing schema object `{name}`");
        }

        pool.close().await;
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run is a no-op");
        pool.close().await;
    }
}

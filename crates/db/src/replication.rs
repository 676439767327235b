use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::debug;

use quotient_core::{
    EngineError, FileId, FileKind, GroupId, Note, NoteId, QuoteFile, QuoteRow, RowId, RowsGroup,
    SnapshotRef, UserId,
};

use crate::store;

/// Duplicates a price-list file and hands back the fresh file handle. Byte
/// storage is an external concern behind this seam; schedule files are
/// duplicated at the record level and never go through it.
#[async_trait]
pub trait FileReplicator: Send + Sync {
    async fn replicate_price_list(&self, source: &QuoteFile) -> Result<QuoteFile, EngineError>;
}

/// Default replicator: clones the file record under a new id, pointing at
/// the same stored bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct CopyingFileReplicator;

#[async_trait]
impl FileReplicator for CopyingFileReplicator {
    async fn replicate_price_list(&self, source: &QuoteFile) -> Result<QuoteFile, EngineError> {
        Ok(QuoteFile {
            id: FileId(store::new_id()),
            kind: FileKind::PriceList,
            name: source.name.clone(),
            path: source.path.clone(),
            schedule_data: None,
            uploaded_by: source.uploaded_by.clone(),
            created_at: Utc::now(),
        })
    }
}

/// Which artifact categories a replication pass carries over.
#[derive(Clone, Debug)]
pub struct ReplicationOptions {
    pub discounts: bool,
    pub mappings: bool,
    pub rows: bool,
    pub groups: bool,
    pub files: bool,
    pub notes: bool,
    /// Body text for a synthesized note when the source has none.
    pub note_fallback_text: Option<String>,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            discounts: true,
            mappings: true,
            rows: true,
            groups: true,
            files: true,
            notes: true,
            note_fallback_text: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    pub discounts: usize,
    pub mappings: usize,
    pub rows: usize,
    pub groups: usize,
    pub files: usize,
    pub notes: usize,
}

/// Deep-copies every artifact attached to one snapshot onto another, inside
/// the caller's transaction. Copy order matters: rows must exist before
/// groups so group membership can be remapped onto the replica rows.
pub struct SnapshotReplicator<'a> {
    files: &'a dyn FileReplicator,
}

impl<'a> SnapshotReplicator<'a> {
    pub fn new(files: &'a dyn FileReplicator) -> Self {
        Self { files }
    }

    pub async fn replicate(
        &self,
        conn: &mut SqliteConnection,
        source: &SnapshotRef,
        target: &SnapshotRef,
        actor: &UserId,
        options: &ReplicationOptions,
    ) -> Result<ReplicationReport, EngineError> {
        let mut report = ReplicationReport::default();

        if options.discounts {
            report.discounts = self.copy_discounts(conn, source, target).await?;
        }
        if options.mappings {
            report.mappings = self.copy_mappings(conn, source, target).await?;
        }

        let mut row_map = HashMap::new();
        if options.rows {
            row_map = self.copy_rows(conn, source, target).await?;
            report.rows = row_map.len();
        }
        if options.groups {
            report.groups = self.copy_groups(conn, source, target, &row_map).await?;
        }
        if options.files {
            report.files = self.copy_files(conn, source, target).await?;
        }
        if options.notes {
            report.notes = self.copy_note(conn, source, target, actor, options).await?;
        }

        debug!(
            source = source.id(),
            target = target.id(),
            rows = report.rows,
            groups = report.groups,
            "replicated snapshot artifacts"
        );
        Ok(report)
    }

    async fn copy_discounts(
        &self,
        conn: &mut SqliteConnection,
        source: &SnapshotRef,
        target: &SnapshotRef,
    ) -> Result<usize, EngineError> {
        let result = sqlx::query(
            r#"
            INSERT INTO discount_attachment (snapshot_kind, snapshot_id, discount_id, duration, sort)
            SELECT ?, ?, discount_id, duration, sort
            FROM discount_attachment
            WHERE snapshot_kind = ? AND snapshot_id = ?
            "#,
        )
        .bind(target.kind())
        .bind(target.id())
        .bind(source.kind())
        .bind(source.id())
        .execute(conn)
        .await
        .map_err(store::db_err)?;
        Ok(result.rows_affected() as usize)
    }

    async fn copy_mappings(
        &self,
        conn: &mut SqliteConnection,
        source: &SnapshotRef,
        target: &SnapshotRef,
    ) -> Result<usize, EngineError> {
        let result = sqlx::query(
            r#"
            INSERT INTO field_column (
                snapshot_kind, snapshot_id, field, column_name,
                is_default_enabled, is_preview_visible, sort
            )
            SELECT ?, ?, field, column_name, is_default_enabled, is_preview_visible, sort
            FROM field_column
            WHERE snapshot_kind = ? AND snapshot_id = ?
            "#,
        )
        .bind(target.kind())
        .bind(target.id())
        .bind(source.kind())
        .bind(source.id())
        .execute(conn)
        .await
        .map_err(store::db_err)?;
        Ok(result.rows_affected() as usize)
    }

    /// Copies rows one at a time so each replica can record which source row
    /// it came from. Returns the source-to-replica id map for group remapping.
    async fn copy_rows(
        &self,
        conn: &mut SqliteConnection,
        source: &SnapshotRef,
        target: &SnapshotRef,
    ) -> Result<HashMap<RowId, RowId>, EngineError> {
        let source_rows = store::load_rows(conn, source).await?;
        let mut row_map = HashMap::with_capacity(source_rows.len());
        let now = Utc::now();
        for source_row in source_rows {
            let replica = QuoteRow {
                id: RowId(store::new_id()),
                snapshot: target.clone(),
                replicated_row_id: Some(source_row.id.clone()),
                product: source_row.product.clone(),
                buy_price: source_row.buy_price,
                list_price: source_row.list_price,
                quantity: source_row.quantity,
                selected: source_row.selected,
            };
            store::insert_row(conn, &replica, now).await?;
            row_map.insert(source_row.id, replica.id);
        }
        Ok(row_map)
    }

    /// Rebuilds each group against the replica rows. Member ids with no
    /// replica (rows deleted mid-flight) are dropped rather than carried
    /// over as dangling references.
    async fn copy_groups(
        &self,
        conn: &mut SqliteConnection,
        source: &SnapshotRef,
        target: &SnapshotRef,
        row_map: &HashMap<RowId, RowId>,
    ) -> Result<usize, EngineError> {
        let source_groups = store::load_groups(conn, source).await?;
        let mut copied = 0;
        for source_group in source_groups {
            let rows_ids: Vec<RowId> = source_group
                .rows_ids
                .iter()
                .filter_map(|row_id| row_map.get(row_id).cloned())
                .collect();
            let replica = RowsGroup {
                id: GroupId(store::new_id()),
                snapshot: target.clone(),
                name: source_group.name.clone(),
                rows_ids,
                sort: source_group.sort,
            };
            store::insert_group(conn, &replica).await?;
            copied += 1;
        }
        Ok(copied)
    }

    async fn copy_files(
        &self,
        conn: &mut SqliteConnection,
        source: &SnapshotRef,
        target: &SnapshotRef,
    ) -> Result<usize, EngineError> {
        let (price_list, schedule) = snapshot_files(conn, source).await?;
        let mut copied = 0;

        if let Some(file_id) = price_list {
            let original = store::load_file(conn, &file_id).await?;
            let replica = self.files.replicate_price_list(&original).await?;
            store::insert_file(conn, &replica).await?;
            store::set_snapshot_file(conn, target, FileKind::PriceList, Some(&replica.id)).await?;
            copied += 1;
        }

        // Payment schedules only travel when their parsed payload exists;
        // the record and the payload are duplicated together.
        if let Some(file_id) = schedule {
            let original = store::load_file(conn, &file_id).await?;
            if original.schedule_data.is_some() {
                let replica = QuoteFile {
                    id: FileId(store::new_id()),
                    kind: FileKind::PaymentSchedule,
                    name: original.name.clone(),
                    path: original.path.clone(),
                    schedule_data: original.schedule_data.clone(),
                    uploaded_by: original.uploaded_by.clone(),
                    created_at: Utc::now(),
                };
                store::insert_file(conn, &replica).await?;
                store::set_snapshot_file(conn, target, FileKind::PaymentSchedule, Some(&replica.id))
                    .await?;
                copied += 1;
            }
        }

        Ok(copied)
    }

    /// Copies the source's note re-owned by the acting user, or synthesizes
    /// one from the fallback text when the source has none.
    async fn copy_note(
        &self,
        conn: &mut SqliteConnection,
        source: &SnapshotRef,
        target: &SnapshotRef,
        actor: &UserId,
        options: &ReplicationOptions,
    ) -> Result<usize, EngineError> {
        let body = match store::attached_note(conn, source).await? {
            Some(note) => Some(note.body),
            None => options.note_fallback_text.clone(),
        };
        let Some(body) = body else {
            return Ok(0);
        };

        let note = Note {
            id: NoteId(store::new_id()),
            author: actor.clone(),
            body,
            from_entity_wizard: false,
            created_at: Utc::now(),
        };
        store::insert_note(conn, &note).await?;
        store::attach_note(conn, &note.id, target).await?;
        Ok(1)
    }
}

async fn snapshot_files(
    conn: &mut SqliteConnection,
    snapshot: &SnapshotRef,
) -> Result<(Option<FileId>, Option<FileId>), EngineError> {
    let table = match snapshot {
        SnapshotRef::Quote(_) => "quote",
        SnapshotRef::Version(_) => "quote_version",
        SnapshotRef::Contract(_) => "contract",
    };
    let sql = format!(
        "SELECT price_list_file_id, payment_schedule_file_id FROM {table} WHERE id = ?"
    );
    let row = sqlx::query_as::<_, (Option<String>, Option<String>)>(&sql)
        .bind(snapshot.id())
        .fetch_optional(conn)
        .await
        .map_err(store::db_err)?;
    let (price_list, schedule) =
        row.ok_or_else(|| EngineError::not_found("snapshot", snapshot.id().to_string()))?;
    Ok((price_list.map(FileId), schedule.map(FileId)))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use quotient_core::{FileId, FileKind, QuoteFile, QuoteId, SnapshotRef, UserId, VersionId};

    use super::{
        CopyingFileReplicator, FileReplicator, ReplicationOptions, SnapshotReplicator,
    };
    use crate::connection::connect_with_settings;
    use crate::migrations::run_pending;
    use crate::store;

    #[tokio::test]
    async fn replicated_price_list_gets_a_fresh_handle_to_the_same_bytes() {
        let source = QuoteFile {
            id: FileId("f-1".to_string()),
            kind: FileKind::PriceList,
            name: "pricelist.csv".to_string(),
            path: "storage/pricelist.csv".to_string(),
            schedule_data: None,
            uploaded_by: UserId("u-1".to_string()),
            created_at: Utc::now(),
        };

        let replica =
            CopyingFileReplicator.replicate_price_list(&source).await.expect("replicate");
        assert_ne!(replica.id, source.id);
        assert_eq!(replica.path, source.path);
        assert_eq!(replica.name, source.name);
        assert_eq!(replica.kind, FileKind::PriceList);
    }

    #[tokio::test]
    async fn group_members_without_a_replica_row_are_dropped() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        sqlx::query(
            r#"
            INSERT INTO quote_row (
                id, snapshot_kind, snapshot_id, replicated_row_id, product,
                buy_price, list_price, quantity, selected, created_at
            ) VALUES ('r-1', 'quote', 'q-1', NULL, 'widget', '700', '1000', 1, 1, ?)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .expect("row");
        // 'r-ghost' names a row that no longer exists
        sqlx::query(
            r#"
            INSERT INTO rows_group (id, snapshot_kind, snapshot_id, name, rows_ids_json, sort)
            VALUES ('g-1', 'quote', 'q-1', 'hardware', '["r-1", "r-ghost"]', 0)
            "#,
        )
        .execute(&pool)
        .await
        .expect("group");

        let mut conn = pool.acquire().await.expect("conn");
        let report = SnapshotReplicator::new(&CopyingFileReplicator)
            .replicate(
                &mut conn,
                &SnapshotRef::Quote(QuoteId("q-1".to_string())),
                &SnapshotRef::Version(VersionId("v-1".to_string())),
                &UserId("u-1".to_string()),
                &ReplicationOptions {
                    discounts: false,
                    mappings: false,
                    files: false,
                    notes: false,
                    ..ReplicationOptions::default()
                },
            )
            .await
            .expect("replicate");
        assert_eq!(report.rows, 1);
        assert_eq!(report.groups, 1);

        let groups = store::load_groups(&mut conn, &SnapshotRef::Version(VersionId("v-1".to_string())))
            .await
            .expect("groups");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].rows_ids.len(), 1);
        let rows = store::load_rows(&mut conn, &SnapshotRef::Version(VersionId("v-1".to_string())))
            .await
            .expect("rows");
        assert_eq!(groups[0].rows_ids[0], rows[0].id);
    }
}

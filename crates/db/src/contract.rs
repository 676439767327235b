use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument};

use quotient_core::{
    contract_number, project_snapshot, update_quote_key, with_lock, AuditCategory, AuditEvent,
    AuditOutcome, AuditSink, Contract, ContractId, EngineError, EventDispatcher, LockManager,
    QuoteEvent, QuoteId, QuoteSnapshot, UserId, LOCK_MAX_WAIT, LOCK_TTL,
};

use crate::connection::DbPool;
use crate::replication::{FileReplicator, ReplicationOptions, SnapshotReplicator};
use crate::store;

/// Converts submitted quotes into contracts: a fixed-field projection of the
/// active snapshot plus a deep copy of its artifacts, minus discounts and
/// notes.
pub struct ContractStateProcessor {
    pool: DbPool,
    locks: Arc<dyn LockManager>,
    files: Arc<dyn FileReplicator>,
    events: Arc<dyn EventDispatcher>,
    audit: Arc<dyn AuditSink>,
    lock_ttl: Duration,
    lock_max_wait: Duration,
}

impl ContractStateProcessor {
    pub fn new(
        pool: DbPool,
        locks: Arc<dyn LockManager>,
        files: Arc<dyn FileReplicator>,
        events: Arc<dyn EventDispatcher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            pool,
            locks,
            files,
            events,
            audit,
            lock_ttl: LOCK_TTL,
            lock_max_wait: LOCK_MAX_WAIT,
        }
    }

    pub fn with_lock_timing(mut self, ttl: Duration, max_wait: Duration) -> Self {
        self.lock_ttl = ttl;
        self.lock_max_wait = max_wait;
        self
    }

    /// The contract number comes from the customer's quote reference with
    /// the reference prefix swapped.
    #[instrument(skip(self))]
    pub async fn convert(
        &self,
        quote_id: &QuoteId,
        actor: &UserId,
    ) -> Result<ContractId, EngineError> {
        let contract_id = with_lock(
            self.locks.as_ref(),
            &update_quote_key(quote_id),
            self.lock_ttl,
            self.lock_max_wait,
            || async {
                let mut tx = self.pool.begin().await.map_err(store::db_err)?;
                let quote = store::load_quote(&mut tx, quote_id).await?;
                if quote.submitted_at.is_none() {
                    return Err(EngineError::Validation(format!(
                        "quote `{}` must be submitted before conversion",
                        quote_id.0
                    )));
                }
                let snapshot = store::load_active_snapshot(&mut tx, &quote).await?;
                let reference =
                    store::customer_quote_reference(&mut tx, &quote.customer_id).await?;

                let fields = project_snapshot(
                    &snapshot,
                    &quote.company,
                    &quote.currency_from,
                    &quote.currency_to,
                );
                let contract = Contract {
                    id: ContractId(store::new_id()),
                    customer_id: quote.customer_id.clone(),
                    number: contract_number(&reference),
                    company: fields.company,
                    vendor: fields.vendor,
                    country: fields.country,
                    currency_from: fields.currency_from,
                    currency_to: fields.currency_to,
                    group_mode: fields.group_mode,
                    price_list_file: None,
                    payment_schedule_file: None,
                    created_at: Utc::now(),
                };
                store::insert_contract(&mut tx, &contract).await?;

                let replicator = SnapshotReplicator::new(self.files.as_ref());
                replicator
                    .replicate(
                        &mut tx,
                        &snapshot.snapshot_ref(),
                        &quotient_core::SnapshotRef::Contract(contract.id.clone()),
                        actor,
                        &ReplicationOptions {
                            discounts: false,
                            groups: contract.group_mode,
                            notes: false,
                            ..ReplicationOptions::default()
                        },
                    )
                    .await?;

                tx.commit().await.map_err(store::db_err)?;
                Ok(contract.id)
            },
        )
        .await?;

        self.events
            .dispatch(QuoteEvent::Exported { quote_id: quote_id.clone(), actor: actor.clone() });
        self.audit.emit(
            AuditEvent::new(
                Some(quote_id.clone()),
                "quote.converted_to_contract",
                AuditCategory::Lifecycle,
                actor.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("contract_id", contract_id.0.clone()),
        );
        info!(quote_id = %quote_id.0, contract_id = %contract_id.0, "quote converted");
        Ok(contract_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use rust_decimal::Decimal;
    use sqlx::Row;

    use quotient_core::{
        CustomerId, EngineError, InMemoryAuditSink, InMemoryEventDispatcher, KeyedLockManager,
        QuoteType, SnapshotRef, UserId,
    };

    use super::ContractStateProcessor;
    use crate::connection::{connect_with_settings, DbPool};
    use crate::migrations::run_pending;
    use crate::processor::{QuoteStateProcessor, StoreStateRequest};
    use crate::replication::CopyingFileReplicator;
    use crate::store;

    struct Harness {
        pool: DbPool,
        quotes: QuoteStateProcessor,
        contracts: ContractStateProcessor,
        dispatcher: InMemoryEventDispatcher,
    }

    async fn setup() -> Harness {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        sqlx::query(
            "INSERT INTO customer (id, name, quote_reference, created_at) VALUES ('c-1', 'Acme GmbH', 'QR-2024-0917', ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .expect("customer");

        let locks = Arc::new(KeyedLockManager::with_poll_interval(Duration::from_millis(2)));
        let dispatcher = InMemoryEventDispatcher::default();
        let audit = InMemoryAuditSink::default();
        let quotes = QuoteStateProcessor::new(
            pool.clone(),
            locks.clone(),
            Arc::new(CopyingFileReplicator),
            Arc::new(dispatcher.clone()),
            Arc::new(dispatcher.clone()),
            Arc::new(audit.clone()),
        )
        .with_lock_timing(Duration::from_secs(2), Duration::from_secs(5));
        let contracts = ContractStateProcessor::new(
            pool.clone(),
            locks,
            Arc::new(CopyingFileReplicator),
            Arc::new(dispatcher.clone()),
            Arc::new(audit),
        )
        .with_lock_timing(Duration::from_secs(2), Duration::from_secs(5));
        Harness { pool, quotes, contracts, dispatcher }
    }

    fn request(submit: bool) -> StoreStateRequest {
        StoreStateRequest {
            quote_id: None,
            customer_id: CustomerId("c-1".to_string()),
            company: "Acme GmbH".to_string(),
            vendor: "vendorco".to_string(),
            country: "DE".to_string(),
            quote_type: QuoteType::New,
            currency_from: "USD".to_string(),
            currency_to: "EUR".to_string(),
            custom_discount: None,
            buy_price: Decimal::from(700),
            group_mode: true,
            submit,
            additional_notes: None,
            price_list_file: None,
            payment_schedule_file: None,
            detach_schedule: false,
            selected_rows: None,
            groups: None,
            field_columns: None,
            hidden_columns: Vec::new(),
            margin: None,
        }
    }

    #[tokio::test]
    async fn conversion_rejects_a_draft_quote() {
        let harness = setup().await;
        let actor = UserId("u-1".to_string());
        let outcome = harness.quotes.store_state(request(false), &actor).await.expect("draft");

        let error =
            harness.contracts.convert(&outcome.quote_id, &actor).await.expect_err("draft rejected");
        assert!(matches!(error, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn conversion_substitutes_the_reference_prefix_and_copies_artifacts() {
        let harness = setup().await;
        let actor = UserId("u-1".to_string());
        let outcome = harness.quotes.store_state(request(true), &actor).await.expect("submit");

        sqlx::query(
            r#"
            INSERT INTO quote_row (
                id, snapshot_kind, snapshot_id, replicated_row_id, product,
                buy_price, list_price, quantity, selected, created_at
            ) VALUES ('r-1', 'quote', ?, NULL, 'widget', '700', '1000', 1, 1, ?)
            "#,
        )
        .bind(&outcome.quote_id.0)
        .bind(Utc::now().to_rfc3339())
        .execute(&harness.pool)
        .await
        .expect("row");
        sqlx::query(
            r#"
            INSERT INTO discount (id, kind, name, method_json, value, vendor, country, quote_type, activated)
            VALUES ('d-1', 'snd', 'd-1', '{"method":"flat"}', '50', 'vendorco', 'DE', 'new', 1)
            "#,
        )
        .execute(&harness.pool)
        .await
        .expect("discount");
        sqlx::query(
            r#"
            INSERT INTO discount_attachment (snapshot_kind, snapshot_id, discount_id, duration, sort)
            VALUES ('quote', ?, 'd-1', NULL, 0)
            "#,
        )
        .bind(&outcome.quote_id.0)
        .execute(&harness.pool)
        .await
        .expect("attachment");

        let contract_id =
            harness.contracts.convert(&outcome.quote_id, &actor).await.expect("convert");

        let row = sqlx::query("SELECT number, vendor, group_mode FROM contract WHERE id = ?")
            .bind(&contract_id.0)
            .fetch_one(&harness.pool)
            .await
            .expect("contract row");
        assert_eq!(row.try_get::<String, _>("number").unwrap(), "CN-2024-0917");
        assert_eq!(row.try_get::<String, _>("vendor").unwrap(), "vendorco");
        assert_eq!(row.try_get::<i64, _>("group_mode").unwrap(), 1);

        let mut conn = harness.pool.acquire().await.expect("conn");
        let contract_ref = SnapshotRef::Contract(contract_id.clone());
        let rows = store::load_rows(&mut conn, &contract_ref).await.expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].product, "widget");
        drop(conn);

        // discounts never cross onto a contract
        let attachments: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM discount_attachment WHERE snapshot_kind = 'contract'",
        )
        .fetch_one(&harness.pool)
        .await
        .expect("count");
        assert_eq!(attachments, 0);

        assert!(harness
            .dispatcher
            .events()
            .iter()
            .any(|event| event.name() == "quote.exported"));
    }
}

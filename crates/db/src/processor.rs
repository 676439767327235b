use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::{info, instrument};

use quotient_core::{
    create_quote_key, update_quote_key, with_lock, AuditCategory, AuditEvent, AuditOutcome,
    AuditSink, CustomerId, DeferredJob, DiscountCandidate, DiscountGroups, EngineError,
    EventDispatcher, FieldColumnMapping, FileId, FileKind, GroupId, JobQueue, LockManager,
    MarginSpec, Note, NoteId, PriceBreakdown, Quote, QuoteEvent, QuoteId, QuoteSnapshot,
    QuoteType, QuoteVersion, ResolvedDiscounts, ReviewService, RowId, RowsGroup, SnapshotRef,
    UserId, VersionId, LOCK_MAX_WAIT, LOCK_TTL,
};

use crate::connection::DbPool;
use crate::replication::{FileReplicator, ReplicationOptions, SnapshotReplicator};
use crate::store::{self, ActiveSnapshot};

/// Full desired state for one quote, applied atomically. `quote_id` absent
/// means create.
#[derive(Clone, Debug)]
pub struct StoreStateRequest {
    pub quote_id: Option<QuoteId>,
    pub customer_id: CustomerId,
    pub company: String,
    pub vendor: String,
    pub country: String,
    pub quote_type: QuoteType,
    pub currency_from: String,
    pub currency_to: String,
    pub custom_discount: Option<Decimal>,
    pub buy_price: Decimal,
    pub group_mode: bool,
    pub submit: bool,
    pub additional_notes: Option<String>,
    pub price_list_file: Option<FileId>,
    pub payment_schedule_file: Option<FileId>,
    pub detach_schedule: bool,
    pub selected_rows: Option<Vec<RowId>>,
    pub groups: Option<Vec<GroupInput>>,
    pub field_columns: Option<Vec<FieldColumnInput>>,
    pub hidden_columns: Vec<String>,
    pub margin: Option<MarginRequest>,
}

#[derive(Clone, Debug)]
pub struct GroupInput {
    pub name: String,
    pub rows_ids: Vec<RowId>,
    pub sort: i32,
}

#[derive(Clone, Debug)]
pub struct FieldColumnInput {
    pub field: String,
    pub column: String,
    pub is_default_enabled: bool,
    pub sort: i32,
}

/// Margin intent: `delete` detaches the current margin; otherwise the spec
/// is resolved through find-or-create.
#[derive(Clone, Debug)]
pub struct MarginRequest {
    pub delete: bool,
    pub spec: Option<MarginSpec>,
}

/// Ad-hoc resolver preview: the applied list plus the four display buckets
/// when grouping was requested.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscountPreview {
    pub resolved: ResolvedDiscounts,
    pub groups: Option<DiscountGroups>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreStateOutcome {
    /// Always the quote's own id, even when the write landed on a version.
    pub quote_id: QuoteId,
    pub version_id: Option<VersionId>,
    pub created: bool,
    pub version_created: bool,
    pub submitted: bool,
}

/// Coordinates every quote mutation: advisory locking, version divergence,
/// artifact replication, persistence and post-commit signalling.
pub struct QuoteStateProcessor {
    pool: DbPool,
    locks: Arc<dyn LockManager>,
    files: Arc<dyn FileReplicator>,
    events: Arc<dyn EventDispatcher>,
    jobs: Arc<dyn JobQueue>,
    audit: Arc<dyn AuditSink>,
    lock_ttl: Duration,
    lock_max_wait: Duration,
}

impl QuoteStateProcessor {
    pub fn new(
        pool: DbPool,
        locks: Arc<dyn LockManager>,
        files: Arc<dyn FileReplicator>,
        events: Arc<dyn EventDispatcher>,
        jobs: Arc<dyn JobQueue>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            pool,
            locks,
            files,
            events,
            jobs,
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

    /// Applies the full requested state under the quote's advisory lock.
    /// When the active version belongs to another editor, the write first
    /// diverges onto a fresh version owned by the actor.
    #[instrument(skip(self, request), fields(quote_id = ?request.quote_id))]
    pub async fn store_state(
        &self,
        request: StoreStateRequest,
        actor: &UserId,
    ) -> Result<StoreStateOutcome, EngineError> {
        validate_request(&request)?;

        let key = match &request.quote_id {
            Some(id) => update_quote_key(id),
            None => create_quote_key(),
        };
        let outcome = with_lock(
            self.locks.as_ref(),
            &key,
            self.lock_ttl,
            self.lock_max_wait,
            || self.store_state_locked(&request, actor),
        )
        .await?;

        self.signal_store_state(&outcome, actor);
        Ok(outcome)
    }

    async fn store_state_locked(
        &self,
        request: &StoreStateRequest,
        actor: &UserId,
    ) -> Result<StoreStateOutcome, EngineError> {
        let mut tx = self.pool.begin().await.map_err(store::db_err)?;
        let now = Utc::now();

        let (mut quote, created) = match &request.quote_id {
            Some(id) => (store::load_quote(&mut tx, id).await?, false),
            None => {
                let quote = new_quote_from(request, now);
                store::insert_quote(&mut tx, &quote).await?;
                (quote, true)
            }
        };

        // Divergence check: a version owned by someone else never gets
        // edited in place.
        let snapshot = store::load_active_snapshot(&mut tx, &quote).await?;
        let mut version_created = false;
        let mut working_version = match snapshot {
            ActiveSnapshot::Version(version) if version.user_id != *actor => {
                let diverged = self.diverge_version(&mut tx, &quote, &version, actor).await?;
                quote.active_version = Some(diverged.id.clone());
                version_created = true;
                Some(diverged)
            }
            ActiveSnapshot::Version(version) => Some(version),
            ActiveSnapshot::Quote(_) => None,
        };

        apply_scalar_fields(&mut quote, working_version.as_mut(), request);

        let mut submitted = false;
        if request.submit {
            submitted = quote.submit(now)?;
        }

        let working_ref = working_version
            .as_ref()
            .map(|version| version.snapshot_ref())
            .unwrap_or_else(|| quote.snapshot_ref());

        // File attachment and row state stay on the snapshot that already
        // holds them when the write just diverged; the replication pass has
        // copied them onto the new version.
        if !version_created {
            self.apply_files(&mut tx, &mut quote, working_version.as_mut(), request).await?;
            if let Some(selected) = &request.selected_rows {
                store::apply_row_selection(&mut tx, &working_ref, selected).await?;
            }
            if let Some(groups) = &request.groups {
                replace_groups(&mut tx, &working_ref, groups).await?;
            }
        }

        if request.detach_schedule {
            set_schedule_file(&mut quote, working_version.as_mut(), None);
        }

        if let Some(columns) = &request.field_columns {
            sync_field_columns(&mut tx, &working_ref, columns).await?;
        }
        if !request.hidden_columns.is_empty() {
            store::hide_columns(&mut tx, &working_ref, &request.hidden_columns).await?;
        }

        if let Some(margin) = &request.margin {
            self.apply_margin(&mut tx, &mut quote, working_version.as_mut(), margin, actor)
                .await?;
        }

        self.upsert_note(
            &mut tx,
            &quote,
            working_version.as_ref().map(|version| version.snapshot_ref()),
            request,
            actor,
            now,
        )
        .await?;

        store::update_quote(&mut tx, &quote).await?;
        if let Some(version) = &working_version {
            store::update_version(&mut tx, version).await?;
        }

        tx.commit().await.map_err(store::db_err)?;

        Ok(StoreStateOutcome {
            quote_id: quote.id,
            version_id: working_version.map(|version| version.id),
            created,
            version_created,
            submitted,
        })
    }

    /// Materializes a fresh version owned by the actor from the current
    /// snapshot, artifacts included, and leaves the quote pointed at it.
    async fn diverge_version(
        &self,
        conn: &mut SqliteConnection,
        quote: &Quote,
        source: &QuoteVersion,
        actor: &UserId,
    ) -> Result<QuoteVersion, EngineError> {
        let version = QuoteVersion {
            id: VersionId(store::new_id()),
            quote_id: quote.id.clone(),
            user_id: actor.clone(),
            version_number: store::next_version_number(conn, &quote.id).await?,
            company: source.company.clone(),
            vendor: source.vendor.clone(),
            country: source.country.clone(),
            quote_type: source.quote_type,
            margin_id: source.margin_id.clone(),
            custom_discount: source.custom_discount,
            group_mode: source.group_mode,
            currency_from: source.currency_from.clone(),
            currency_to: source.currency_to.clone(),
            price_list_file: None,
            payment_schedule_file: None,
            is_complete: false,
            created_at: Utc::now(),
            deleted_at: None,
        };
        store::insert_version(conn, &version).await?;

        let replicator = SnapshotReplicator::new(self.files.as_ref());
        replicator
            .replicate(
                conn,
                &source.snapshot_ref(),
                &version.snapshot_ref(),
                actor,
                &ReplicationOptions {
                    groups: source.group_mode,
                    notes: false,
                    ..ReplicationOptions::default()
                },
            )
            .await?;

        // file pointers were set by the replication pass; reload them
        let version = store::load_version(conn, &version.id).await?;

        self.audit.emit(
            AuditEvent::new(
                Some(quote.id.clone()),
                "quote.version_diverged",
                AuditCategory::Lifecycle,
                actor.clone(),
                AuditOutcome::Success,
            )
            .with_diff(
                "active_version",
                source.id.0.clone(),
                version.id.0.clone(),
            ),
        );
        Ok(version)
    }

    /// Attach-if-different: a requested file identical to the current
    /// pointer is left alone. Unknown file ids are rejected before anything
    /// is written.
    async fn apply_files(
        &self,
        conn: &mut SqliteConnection,
        quote: &mut Quote,
        mut working_version: Option<&mut QuoteVersion>,
        request: &StoreStateRequest,
    ) -> Result<(), EngineError> {
        if let Some(file) = &request.price_list_file {
            let current = match &working_version {
                Some(version) => version.price_list_file.as_ref(),
                None => quote.price_list_file.as_ref(),
            };
            if current != Some(file) {
                let loaded = store::load_file(conn, file).await?;
                if loaded.kind != FileKind::PriceList {
                    return Err(EngineError::Validation(format!(
                        "file `{}` is not a price list",
                        file.0
                    )));
                }
                match working_version.as_deref_mut() {
                    Some(version) => version.price_list_file = Some(file.clone()),
                    None => quote.price_list_file = Some(file.clone()),
                }
            }
        }

        if let Some(file) = &request.payment_schedule_file {
            let current = match &working_version {
                Some(version) => version.payment_schedule_file.as_ref(),
                None => quote.payment_schedule_file.as_ref(),
            };
            if current != Some(file) {
                let loaded = store::load_file(conn, file).await?;
                if loaded.kind != FileKind::PaymentSchedule {
                    return Err(EngineError::Validation(format!(
                        "file `{}` is not a payment schedule",
                        file.0
                    )));
                }
                match working_version.as_deref_mut() {
                    Some(version) => version.payment_schedule_file = Some(file.clone()),
                    None => quote.payment_schedule_file = Some(file.clone()),
                }
            }
        }
        Ok(())
    }

    /// Find-or-create against the exact margin tuple; a request matching the
    /// already-attached margin is a no-op.
    async fn apply_margin(
        &self,
        conn: &mut SqliteConnection,
        quote: &mut Quote,
        working_version: Option<&mut QuoteVersion>,
        request: &MarginRequest,
        actor: &UserId,
    ) -> Result<(), EngineError> {
        let previous = quote.margin_id.clone();
        let next = if request.delete {
            None
        } else {
            match &request.spec {
                Some(spec) => Some(store::find_or_create_margin(conn, spec).await?.id),
                None => previous.clone(),
            }
        };
        if next == previous {
            return Ok(());
        }

        quote.margin_id = next.clone();
        if let Some(version) = working_version {
            version.margin_id = next.clone();
        }
        self.audit.emit(
            AuditEvent::new(
                Some(quote.id.clone()),
                "quote.margin_changed",
                AuditCategory::Margin,
                actor.clone(),
                AuditOutcome::Success,
            )
            .with_diff(
                "margin_id",
                previous.map(|id| id.0).unwrap_or_default(),
                next.map(|id| id.0).unwrap_or_default(),
            ),
        );
        Ok(())
    }

    /// Inbound free text updates the quote's existing note in place or
    /// creates a new one, on every save. The note is bound to the quote and,
    /// when a version is being edited, to that version as well.
    async fn upsert_note(
        &self,
        conn: &mut SqliteConnection,
        quote: &Quote,
        version_ref: Option<SnapshotRef>,
        request: &StoreStateRequest,
        actor: &UserId,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let Some(body) = &request.additional_notes else {
            return Ok(());
        };
        let quote_ref = SnapshotRef::Quote(quote.id.clone());
        let note_id = match store::attached_note(conn, &quote_ref).await? {
            Some(existing) => {
                store::update_note_body(conn, &existing.id, body).await?;
                existing.id
            }
            None => {
                let note = Note {
                    id: NoteId(store::new_id()),
                    author: actor.clone(),
                    body: body.clone(),
                    from_entity_wizard: false,
                    created_at: now,
                };
                store::insert_note(conn, &note).await?;
                store::attach_note(conn, &note.id, &quote_ref).await?;
                note.id
            }
        };
        if let Some(version_ref) = &version_ref {
            store::attach_note(conn, &note_id, version_ref).await?;
        }
        Ok(())
    }

    fn signal_store_state(&self, outcome: &StoreStateOutcome, actor: &UserId) {
        let event = if outcome.created {
            QuoteEvent::Created { quote_id: outcome.quote_id.clone(), actor: actor.clone() }
        } else {
            QuoteEvent::Updated { quote_id: outcome.quote_id.clone(), actor: actor.clone() }
        };
        self.events.dispatch(event);
        if outcome.submitted {
            self.events.dispatch(QuoteEvent::Submitted {
                quote_id: outcome.quote_id.clone(),
                actor: actor.clone(),
            });
        }
        self.jobs
            .enqueue(DeferredJob::RecomputePriceAttributes { quote_id: outcome.quote_id.clone() });
        self.audit.emit(
            AuditEvent::new(
                Some(outcome.quote_id.clone()),
                if outcome.created { "quote.created" } else { "quote.updated" },
                AuditCategory::Lifecycle,
                actor.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("version_created", outcome.version_created.to_string()),
        );
        info!(
            quote_id = %outcome.quote_id.0,
            created = outcome.created,
            version_created = outcome.version_created,
            "quote state stored"
        );
    }

    /// Copies a whole quote: a fresh draft with the source snapshot's
    /// artifacts deep-copied onto it. The replica starts unsubmitted and
    /// unversioned regardless of the source state.
    #[instrument(skip(self))]
    pub async fn replicate_quote(
        &self,
        source_id: &QuoteId,
        actor: &UserId,
    ) -> Result<QuoteId, EngineError> {
        let replica_id = with_lock(
            self.locks.as_ref(),
            &create_quote_key(),
            self.lock_ttl,
            self.lock_max_wait,
            || async {
                // the source is mutated too, so its own update lock is held
                // alongside the creation lock
                with_lock(
                    self.locks.as_ref(),
                    &update_quote_key(source_id),
                    self.lock_ttl,
                    self.lock_max_wait,
                    || self.replicate_quote_locked(source_id, actor),
                )
                .await
            },
        )
        .await?;

        self.events.dispatch(QuoteEvent::Copied {
            quote_id: source_id.clone(),
            replica_id: replica_id.clone(),
            actor: actor.clone(),
        });
        self.jobs.enqueue(DeferredJob::MigrateQuoteAssets { quote_id: replica_id.clone() });
        self.audit.emit(
            AuditEvent::new(
                Some(source_id.clone()),
                "quote.replicated",
                AuditCategory::Replication,
                actor.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("replica_id", replica_id.0.clone()),
        );
        Ok(replica_id)
    }

    async fn replicate_quote_locked(
        &self,
        source_id: &QuoteId,
        actor: &UserId,
    ) -> Result<QuoteId, EngineError> {
        let mut tx = self.pool.begin().await.map_err(store::db_err)?;
        let source = store::load_quote(&mut tx, source_id).await?;
        let snapshot = store::load_active_snapshot(&mut tx, &source).await?;

        // the replica takes over as the active copy
        store::deactivate_quote(&mut tx, source_id).await?;

        let replica = Quote {
            id: QuoteId(store::new_id()),
            customer_id: source.customer_id.clone(),
            company: source.company.clone(),
            vendor: snapshot.vendor().to_string(),
            country: snapshot.country().to_string(),
            quote_type: snapshot.quote_type(),
            active_version: None,
            submitted_at: None,
            activated_at: Some(Utc::now()),
            margin_id: snapshot.margin_id().cloned(),
            custom_discount: snapshot.custom_discount(),
            buy_price: source.buy_price,
            group_mode: snapshot.group_mode(),
            currency_from: source.currency_from.clone(),
            currency_to: source.currency_to.clone(),
            price_list_file: None,
            payment_schedule_file: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        store::insert_quote(&mut tx, &replica).await?;

        let replicator = SnapshotReplicator::new(self.files.as_ref());
        replicator
            .replicate(
                &mut tx,
                &snapshot.snapshot_ref(),
                &replica.snapshot_ref(),
                actor,
                &ReplicationOptions {
                    groups: snapshot.group_mode(),
                    note_fallback_text: Some(format!("Copied from quote {}", source.id.0)),
                    ..ReplicationOptions::default()
                },
            )
            .await?;

        tx.commit().await.map_err(store::db_err)?;
        Ok(replica.id)
    }

    /// Returns a submitted quote to Draft.
    #[instrument(skip(self))]
    pub async fn process_unravel(
        &self,
        quote_id: &QuoteId,
        actor: &UserId,
    ) -> Result<(), EngineError> {
        with_lock(
            self.locks.as_ref(),
            &update_quote_key(quote_id),
            self.lock_ttl,
            self.lock_max_wait,
            || async {
                let mut tx = self.pool.begin().await.map_err(store::db_err)?;
                let mut quote = store::load_quote(&mut tx, quote_id).await?;
                quote.unravel()?;
                store::update_quote(&mut tx, &quote).await?;
                tx.commit().await.map_err(store::db_err)?;
                Ok(())
            },
        )
        .await?;

        self.events
            .dispatch(QuoteEvent::Unravelled { quote_id: quote_id.clone(), actor: actor.clone() });
        self.audit.emit(AuditEvent::new(
            Some(quote_id.clone()),
            "quote.unravelled",
            AuditCategory::Lifecycle,
            actor.clone(),
            AuditOutcome::Success,
        ));
        Ok(())
    }

    /// Repoints the quote at one of its own versions. Returns `false` when
    /// the pointer already named that version.
    #[instrument(skip(self))]
    pub async fn set_version(
        &self,
        quote_id: &QuoteId,
        version_id: &VersionId,
        actor: &UserId,
    ) -> Result<bool, EngineError> {
        let changed = with_lock(
            self.locks.as_ref(),
            &update_quote_key(quote_id),
            self.lock_ttl,
            self.lock_max_wait,
            || async {
                let mut tx = self.pool.begin().await.map_err(store::db_err)?;
                let mut quote = store::load_quote(&mut tx, quote_id).await?;
                let version = store::load_version(&mut tx, version_id).await?;
                if version.quote_id != quote.id {
                    return Err(EngineError::Validation(format!(
                        "version `{}` does not belong to quote `{}`",
                        version_id.0, quote_id.0
                    )));
                }
                if quote.active_version.as_ref() == Some(version_id) {
                    return Ok(false);
                }
                let previous = quote.active_version.clone();
                quote.active_version = Some(version.id.clone());
                store::update_quote(&mut tx, &quote).await?;
                tx.commit().await.map_err(store::db_err)?;

                self.audit.emit(
                    AuditEvent::new(
                        Some(quote_id.clone()),
                        "quote.version_changed",
                        AuditCategory::Lifecycle,
                        actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_diff(
                        "active_version",
                        previous.map(|id| id.0).unwrap_or_default(),
                        version_id.0.clone(),
                    ),
                );
                Ok(true)
            },
        )
        .await?;

        if changed {
            self.events
                .dispatch(QuoteEvent::Updated { quote_id: quote_id.clone(), actor: actor.clone() });
        }
        Ok(changed)
    }

    /// Previews the discount resolution for an ad-hoc candidate set against
    /// the quote's current selected rows. Persists nothing.
    pub async fn try_discounts(
        &self,
        quote_id: &QuoteId,
        candidates: Vec<DiscountCandidate>,
        group: bool,
    ) -> Result<DiscountPreview, EngineError> {
        let breakdown = self
            .compose_breakdown(&SnapshotRef::Quote(quote_id.clone()), Some(candidates))
            .await?;
        let groups = group.then(|| breakdown.discounts.grouped());
        Ok(DiscountPreview { resolved: breakdown.discounts, groups })
    }

    /// Full read-side price breakdown from the persisted state. Accepts a
    /// quote ref, resolved through its active version, or a version ref
    /// reviewed directly.
    pub async fn review(&self, target: &SnapshotRef) -> Result<PriceBreakdown, EngineError> {
        self.compose_breakdown(target, None).await
    }

    async fn compose_breakdown(
        &self,
        target: &SnapshotRef,
        candidates: Option<Vec<DiscountCandidate>>,
    ) -> Result<PriceBreakdown, EngineError> {
        let mut conn = self.pool.acquire().await.map_err(store::db_err)?;
        let snapshot = match target {
            SnapshotRef::Quote(id) => {
                let quote = store::load_quote(&mut conn, id).await?;
                store::load_active_snapshot(&mut conn, &quote).await?
            }
            SnapshotRef::Version(id) => {
                ActiveSnapshot::Version(store::load_version(&mut conn, id).await?)
            }
            SnapshotRef::Contract(_) => {
                return Err(EngineError::Validation(
                    "contracts carry no price review".to_string(),
                ))
            }
        };
        let snapshot_ref = snapshot.snapshot_ref();

        let rows = store::load_rows(&mut conn, &snapshot_ref).await?;
        let margin = match snapshot.margin_id() {
            Some(id) => Some(store::load_margin(&mut conn, id).await?),
            None => None,
        };
        let candidates = match candidates {
            Some(candidates) => candidates,
            None => store::attached_candidates(&mut conn, &snapshot_ref).await?,
        };

        Ok(ReviewService::default().compose(&snapshot, &rows, margin.as_ref(), candidates))
    }
}

fn validate_request(request: &StoreStateRequest) -> Result<(), EngineError> {
    let required = [
        ("company", &request.company),
        ("vendor", &request.vendor),
        ("country", &request.country),
        ("currency_from", &request.currency_from),
        ("currency_to", &request.currency_to),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(EngineError::Validation(format!("{field} must not be empty")));
        }
    }
    if request.buy_price < Decimal::ZERO {
        return Err(EngineError::Validation("buy_price must not be negative".to_string()));
    }
    if let Some(discount) = request.custom_discount {
        if discount < Decimal::ZERO {
            return Err(EngineError::Validation(
                "custom_discount must not be negative".to_string(),
            ));
        }
    }
    Ok(())
}

fn new_quote_from(request: &StoreStateRequest, now: chrono::DateTime<Utc>) -> Quote {
    Quote {
        id: QuoteId(store::new_id()),
        customer_id: request.customer_id.clone(),
        company: request.company.clone(),
        vendor: request.vendor.clone(),
        country: request.country.clone(),
        quote_type: request.quote_type,
        active_version: None,
        submitted_at: None,
        activated_at: None,
        margin_id: None,
        custom_discount: request.custom_discount,
        buy_price: request.buy_price,
        group_mode: request.group_mode,
        currency_from: request.currency_from.clone(),
        currency_to: request.currency_to.clone(),
        price_list_file: None,
        payment_schedule_file: None,
        created_at: now,
        deleted_at: None,
    }
}

fn apply_scalar_fields(
    quote: &mut Quote,
    working_version: Option<&mut QuoteVersion>,
    request: &StoreStateRequest,
) {
    quote.company = request.company.clone();
    quote.vendor = request.vendor.clone();
    quote.country = request.country.clone();
    quote.quote_type = request.quote_type;
    quote.custom_discount = request.custom_discount;
    quote.buy_price = request.buy_price;
    quote.group_mode = request.group_mode;
    quote.currency_from = request.currency_from.clone();
    quote.currency_to = request.currency_to.clone();

    if let Some(version) = working_version {
        version.company = request.company.clone();
        version.vendor = request.vendor.clone();
        version.country = request.country.clone();
        version.quote_type = request.quote_type;
        version.custom_discount = request.custom_discount;
        version.group_mode = request.group_mode;
        version.currency_from = request.currency_from.clone();
        version.currency_to = request.currency_to.clone();
    }
}

fn set_schedule_file(
    quote: &mut Quote,
    working_version: Option<&mut QuoteVersion>,
    file: Option<FileId>,
) {
    match working_version {
        Some(version) => version.payment_schedule_file = file,
        None => quote.payment_schedule_file = file,
    }
}

async fn replace_groups(
    conn: &mut SqliteConnection,
    snapshot: &SnapshotRef,
    groups: &[GroupInput],
) -> Result<(), EngineError> {
    store::delete_groups(conn, snapshot).await?;
    for input in groups {
        let group = RowsGroup {
            id: GroupId(store::new_id()),
            snapshot: snapshot.clone(),
            name: input.name.clone(),
            rows_ids: input.rows_ids.clone(),
            sort: input.sort,
        };
        store::insert_group(conn, &group).await?;
    }
    Ok(())
}

/// Replaces the mapping set. Entries with an empty column or disabled by
/// default are dropped instead of stored.
async fn sync_field_columns(
    conn: &mut SqliteConnection,
    snapshot: &SnapshotRef,
    columns: &[FieldColumnInput],
) -> Result<(), EngineError> {
    store::delete_mappings(conn, snapshot).await?;
    for input in columns {
        if input.column.trim().is_empty() || !input.is_default_enabled {
            continue;
        }
        let mapping = FieldColumnMapping {
            snapshot: snapshot.clone(),
            field: input.field.clone(),
            column: input.column.clone(),
            is_default_enabled: input.is_default_enabled,
            is_preview_visible: true,
            sort: input.sort,
        };
        store::upsert_mapping(conn, &mapping).await?;
    }
    Ok(())
}

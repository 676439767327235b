pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod locks;
pub mod pricing;
pub mod telemetry;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use config::{ConfigError, EngineConfig, LockConfig, LogFormat};
pub use domain::artifacts::{
    FieldColumnMapping, FileId, FileKind, GroupId, Note, NoteId, QuoteFile, QuoteRow, RowId,
    RowsGroup,
};
pub use domain::contract::{contract_number, project_snapshot, Contract, ContractFields, ContractId};
pub use domain::discount::{
    Discount, DiscountAttachment, DiscountId, DiscountKind, DiscountMethod, DurationTier,
};
pub use domain::margin::{CountryMargin, MarginId, MarginMethod, MarginSpec};
pub use domain::quote::{
    CustomerId, Quote, QuoteId, QuoteSnapshot, QuoteState, QuoteType, QuoteVersion, SnapshotRef,
    UserId, VersionId,
};
pub use errors::{DomainError, EngineError};
pub use events::{
    DeferredJob, EventDispatcher, InMemoryEventDispatcher, JobQueue, QuoteEvent,
    TracingEventDispatcher,
};
pub use locks::{
    create_quote_key, update_quote_file_key, update_quote_key, with_lock, KeyedLockManager,
    LockGuard, LockManager, LOCK_MAX_WAIT, LOCK_TTL,
};
pub use pricing::margin::{margin_percentage, total_after_margin};
pub use pricing::resolver::{
    AppliedDiscount, DiscountCandidate, DiscountGroups, DiscountResolver, ResolvedDiscounts,
};
pub use pricing::review::{margin_delta, PriceBreakdown, ReviewService, RowBreakdown};
pub use telemetry::init_logging;

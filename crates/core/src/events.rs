use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::quote::{QuoteId, UserId};

/// Domain events published after a mutation commits. Consumers (search
/// indexing, CRM sync, exports) live outside this core; emission is
/// fire-and-forget and never awaited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QuoteEvent {
    Created { quote_id: QuoteId, actor: UserId },
    Updated { quote_id: QuoteId, actor: UserId },
    Submitted { quote_id: QuoteId, actor: UserId },
    Unravelled { quote_id: QuoteId, actor: UserId },
    Exported { quote_id: QuoteId, actor: UserId },
    Copied { quote_id: QuoteId, replica_id: QuoteId, actor: UserId },
}

impl QuoteEvent {
    pub fn quote_id(&self) -> &QuoteId {
        match self {
            Self::Created { quote_id, .. }
            | Self::Updated { quote_id, .. }
            | Self::Submitted { quote_id, .. }
            | Self::Unravelled { quote_id, .. }
            | Self::Exported { quote_id, .. }
            | Self::Copied { quote_id, .. } => quote_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "quote.created",
            Self::Updated { .. } => "quote.updated",
            Self::Submitted { .. } => "quote.submitted",
            Self::Unravelled { .. } => "quote.unravelled",
            Self::Exported { .. } => "quote.exported",
            Self::Copied { .. } => "quote.copied",
        }
    }
}

pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: QuoteEvent);
}

/// Deferred work handed to an external queue; completion is never awaited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum DeferredJob {
    RecomputePriceAttributes { quote_id: QuoteId },
    MigrateQuoteAssets { quote_id: QuoteId },
}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: DeferredJob);
}

/// Runtime dispatcher: structured log emission stands in for the outbound
/// message bus in single-process deployments.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventDispatcher;

impl EventDispatcher for TracingEventDispatcher {
    fn dispatch(&self, event: QuoteEvent) {
        info!(event = event.name(), quote_id = %event.quote_id().0, "domain event");
    }
}

impl JobQueue for TracingEventDispatcher {
    fn enqueue(&self, job: DeferredJob) {
        info!(?job, "deferred job enqueued");
    }
}

#[derive(Clone, Default)]
pub struct InMemoryEventDispatcher {
    events: Arc<Mutex<Vec<QuoteEvent>>>,
    jobs: Arc<Mutex<Vec<DeferredJob>>>,
}

impl InMemoryEventDispatcher {
    pub fn events(&self) -> Vec<QuoteEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn jobs(&self) -> Vec<DeferredJob> {
        match self.jobs.lock() {
            Ok(jobs) => jobs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventDispatcher for InMemoryEventDispatcher {
    fn dispatch(&self, event: QuoteEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

impl JobQueue for InMemoryEventDispatcher {
    fn enqueue(&self, job: DeferredJob) {
        match self.jobs.lock() {
            Ok(mut jobs) => jobs.push(job),
            Err(poisoned) => poisoned.into_inner().push(job),
        }
    }
}

//! In-process sync events.

use crate::conflict::ResolutionStrategy;
use crate::quotation::{Quotation, QuotationId};
use crate::state::QuotationState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncEventKind {
    /// A record was created.
    Created,
    /// A record's content or version changed.
    Updated,
    /// A record was deleted.
    Deleted,
    /// A record's lifecycle state changed.
    StateChanged,
}

impl SyncEventKind {
    /// All event kinds.
    pub const ALL: [SyncEventKind; 4] = [
        SyncEventKind::Created,
        SyncEventKind::Updated,
        SyncEventKind::Deleted,
        SyncEventKind::StateChanged,
    ];
}

/// Optional data carried by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEventPayload {
    /// The record as it is after the change.
    Record(Box<Quotation>),
    /// A lifecycle transition.
    StateChange {
        /// State before the transition.
        from: QuotationState,
        /// State after the transition.
        to: QuotationState,
    },
    /// A conflict resolution that rewrote the record.
    Resolution {
        /// Strategy that was applied.
        strategy: ResolutionStrategy,
        /// Resulting version.
        version: u64,
    },
}

/// A change notification delivered to whichever subscribers are registered
/// at emit time. Events are never queued or replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    /// What happened.
    pub kind: SyncEventKind,
    /// Record it happened to.
    pub record_id: QuotationId,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Optional payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<SyncEventPayload>,
}

impl SyncEvent {
    /// Creates an event with no payload.
    pub fn new(kind: SyncEventKind, record_id: QuotationId) -> Self {
        Self {
            kind,
            record_id,
            timestamp: Utc::now(),
            payload: None,
        }
    }

    /// Creates a `created` event carrying the new record.
    pub fn created(record: &Quotation) -> Self {
        Self::new(SyncEventKind::Created, record.id)
            .with_payload(SyncEventPayload::Record(Box::new(record.clone())))
    }

    /// Creates an `updated` event carrying the record.
    pub fn updated(record: &Quotation) -> Self {
        Self::new(SyncEventKind::Updated, record.id)
            .with_payload(SyncEventPayload::Record(Box::new(record.clone())))
    }

    /// Creates a `deleted` event.
    pub fn deleted(record_id: QuotationId) -> Self {
        Self::new(SyncEventKind::Deleted, record_id)
    }

    /// Creates a `state-changed` event.
    pub fn state_changed(record_id: QuotationId, from: QuotationState, to: QuotationState) -> Self {
        Self::new(SyncEventKind::StateChanged, record_id)
            .with_payload(SyncEventPayload::StateChange { from, to })
    }

    /// Creates an `updated` event describing a conflict resolution.
    pub fn resolved(record: &Quotation, strategy: ResolutionStrategy) -> Self {
        Self::new(SyncEventKind::Updated, record.id).with_payload(SyncEventPayload::Resolution {
            strategy,
            version: record.version,
        })
    }

    /// Attaches a payload.
    pub fn with_payload(mut self, payload: SyncEventPayload) -> Self {
        self.payload = Some(payload);
        self
    }
}

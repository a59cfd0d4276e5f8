//! Collaborator interfaces the engine talks to.
//!
//! These traits abstract persistence, the local cache, audit, notification
//! and reachability so the engine can run against the HTTP server, an
//! embedded store, or the in-memory implementations used in tests.

use crate::error::SyncResult;
use async_trait::async_trait;
use quotesync_protocol::{CreateQuotationRequest, Quotation, QuotationId, QuotationPatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-authoritative persistence.
///
/// Every call is expected to be atomic: `update` is a single
/// read-modify-write that bumps `version` by one.
#[async_trait]
pub trait QuotationStore: Send + Sync {
    /// Fetches a record. Returns `SyncError::NotFound` if it does not exist.
    async fn get(&self, id: QuotationId) -> SyncResult<Quotation>;

    /// Applies a patch and returns the new record.
    async fn update(&self, id: QuotationId, patch: QuotationPatch) -> SyncResult<Quotation>;

    /// Lists every record of a client.
    async fn find_by_client(&self, client_email: &str) -> SyncResult<Vec<Quotation>>;

    /// Creates a record in the initial state.
    async fn create(&self, request: CreateQuotationRequest) -> SyncResult<Quotation>;

    /// Checks that the backing store answers.
    async fn ping(&self) -> SyncResult<()>;
}

/// Client-held cache of server copies.
#[async_trait]
pub trait QuotationCache: Send + Sync {
    /// Returns the cached copy, if any.
    async fn get(&self, id: QuotationId) -> SyncResult<Option<Quotation>>;

    /// Stores a copy, replacing any previous one.
    async fn put(&self, record: Quotation) -> SyncResult<()>;

    /// Removes a copy.
    async fn remove(&self, id: QuotationId) -> SyncResult<Option<Quotation>>;

    /// Lists cached ids.
    async fn ids(&self) -> SyncResult<Vec<QuotationId>>;
}

/// Best-effort audit trail. Failures are logged by callers, never
/// propagated into the primary operation.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records one audit entry.
    async fn record_audit(&self, entry: AuditEntry) -> SyncResult<()>;
}

/// Staff notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// User ids that receive lifecycle notifications.
    async fn staff_recipients(&self) -> SyncResult<Vec<String>>;

    /// Sends one notification.
    async fn notify(&self, user_id: &str, title: &str, body: &str) -> SyncResult<()>;
}

/// Reachability check used by the connection monitor.
///
/// Only the boolean outcome matters; errors are treated as "offline".
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns true if the server and its store are reachable.
    async fn probe(&self) -> SyncResult<bool>;
}

/// Who performed an operation. Authentication happens upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Actor ID.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl Actor {
    /// Creates an actor.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// The actor used when nobody is identified.
    pub fn system() -> Self {
        Self::new("system", "system")
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::system()
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// What happened (`STATE_CHANGE`, `SUPERSEDED`, ...).
    pub action: String,
    /// Kind of entity.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Actor ID.
    pub actor_id: String,
    /// Actor display name.
    pub actor_name: String,
    /// Structured details (before/after diff and context).
    pub details: Value,
}

impl AuditEntry {
    /// Entity type used for quotation audits.
    pub const QUOTATION: &'static str = "quotation";

    /// Creates an audit entry about a quotation.
    pub fn quotation(
        action: impl Into<String>,
        id: QuotationId,
        actor: &Actor,
        details: Value,
    ) -> Self {
        Self {
            action: action.into(),
            entity_type: Self::QUOTATION.into(),
            entity_id: id.to_string(),
            actor_id: actor.id.clone(),
            actor_name: actor.name.clone(),
            details,
        }
    }
}

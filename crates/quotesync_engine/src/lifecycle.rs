//! Quotation lifecycle transitions.
//!
//! [`QuotationStateMachine`] validates a requested transition against the
//! table on [`QuotationState`], applies it through the store, then runs the
//! side effects in a fixed order:
//!
//! 1. the record itself is updated
//! 2. on a forced activation, [`ActiveSupersession`] deactivates the other
//!    active quotations of the same client
//! 3. staff are notified when the record is accepted, rejected or expired
//! 4. the transition is audited with a before/after diff
//! 5. `state-changed` events are emitted
//!
//! A rejected transition runs none of these.
//!
//! Every write carries the version it was validated against. When another
//! writer moved the record in between, the transition re-reads it and
//! validates again, so two concurrent requests can never both apply on the
//! strength of the same stale read. Activations of one client are also
//! serialized within a state machine, which keeps the "already active" check
//! and the write that depends on it together.

use crate::bus::SyncEventBus;
use crate::collaborators::{Actor, AuditEntry, AuditSink, Notifier, QuotationStore};
use crate::error::{SyncError, SyncResult};
use quotesync_protocol::{
    record_changes, Quotation, QuotationId, QuotationPatch, QuotationState, StateChangeRequest,
    SyncEvent,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Audit action for a primary transition.
pub const STATE_CHANGE_ACTION: &str = "STATE_CHANGE";

/// Audit action for a quotation deactivated by another one's activation.
pub const SUPERSEDED_ACTION: &str = "SUPERSEDED";

/// Guarded writes attempted before a contended transition gives up.
pub const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Result of an accepted transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    /// The record after the transition.
    pub record: Quotation,
    /// State before the transition.
    pub previous: QuotationState,
    /// Quotations moved from `ACTIVA` to `INACTIVA` by the cascade.
    pub superseded: Vec<Quotation>,
}

/// The "one active quotation per client" cascade.
///
/// Kept separate from the state machine so it can be exercised and audited
/// on its own.
#[derive(Clone)]
pub struct ActiveSupersession {
    store: Arc<dyn QuotationStore>,
    audit: Arc<dyn AuditSink>,
}

impl ActiveSupersession {
    /// Creates the cascade over the given collaborators.
    pub fn new(store: Arc<dyn QuotationStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Other quotations of the same client currently in `ACTIVA`.
    pub async fn active_siblings(&self, record: &Quotation) -> SyncResult<Vec<Quotation>> {
        Ok(self
            .store
            .find_by_client(&record.client_email)
            .await?
            .into_iter()
            .filter(|q| q.id != record.id && q.state == QuotationState::Activa)
            .collect())
    }

    /// Moves every active sibling of `activated` to `INACTIVA`.
    ///
    /// Each deactivation is audited as superseded by `activated`. A sibling
    /// that leaves `ACTIVA` on its own while the cascade runs is left alone.
    /// Store failures stop the cascade and are returned; audit failures are
    /// only logged.
    pub async fn supersede(
        &self,
        activated: &Quotation,
        actor: &Actor,
    ) -> SyncResult<Vec<Quotation>> {
        let siblings = self.active_siblings(activated).await?;
        let mut superseded = Vec::with_capacity(siblings.len());

        for sibling in siblings {
            let Some((before, updated)) = self.deactivate(sibling).await? else {
                continue;
            };

            tracing::info!(
                record_id = %before.id,
                superseded_by = %activated.id,
                client = %activated.client_email,
                "active quotation superseded"
            );

            let entry = AuditEntry::quotation(
                SUPERSEDED_ACTION,
                before.id,
                actor,
                json!({
                    "from": before.state,
                    "to": updated.state,
                    "supersededBy": activated.id,
                    "changes": record_changes(&before, &updated),
                }),
            );
            if let Err(e) = self.audit.record_audit(entry).await {
                tracing::warn!(record_id = %before.id, error = %e, "audit write failed");
            }

            superseded.push(updated);
        }
        Ok(superseded)
    }

    /// Guarded `ACTIVA` to `INACTIVA` write. Returns the record before and
    /// after, or `None` once it is no longer active.
    async fn deactivate(
        &self,
        mut sibling: Quotation,
    ) -> SyncResult<Option<(Quotation, Quotation)>> {
        let mut attempt = 1;
        loop {
            if sibling.state != QuotationState::Activa {
                tracing::debug!(
                    record_id = %sibling.id,
                    state = %sibling.state,
                    "sibling left ACTIVA before supersession"
                );
                return Ok(None);
            }
            let patch = QuotationPatch::state(QuotationState::Inactiva).expecting(sibling.version);
            match self.store.update(sibling.id, patch).await {
                Ok(updated) => return Ok(Some((sibling, updated))),
                Err(SyncError::StaleWrite { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    attempt += 1;
                    sibling = self.store.get(sibling.id).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for ActiveSupersession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSupersession").finish_non_exhaustive()
    }
}

/// One async lock per client, taken around activations.
#[derive(Debug, Default)]
struct ActivationLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ActivationLocks {
    async fn acquire(self: &Arc<Self>, client_email: &str) -> ActivationGuard {
        let key = client_email.trim().to_lowercase();
        let lock = Arc::clone(self.locks.lock().entry(key.clone()).or_default());
        let guard = lock.lock_owned().await;
        ActivationGuard {
            locks: Arc::clone(self),
            key,
            guard: Some(guard),
        }
    }
}

struct ActivationGuard {
    locks: Arc<ActivationLocks>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.locks.lock();
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

/// Validates and applies quotation lifecycle transitions.
#[derive(Clone)]
pub struct QuotationStateMachine {
    store: Arc<dyn QuotationStore>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    bus: SyncEventBus,
    supersession: ActiveSupersession,
    activations: Arc<ActivationLocks>,
}

impl QuotationStateMachine {
    /// Creates a state machine over the given collaborators.
    pub fn new(
        store: Arc<dyn QuotationStore>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
        bus: SyncEventBus,
    ) -> Self {
        let supersession = ActiveSupersession::new(Arc::clone(&store), Arc::clone(&audit));
        Self {
            store,
            audit,
            notifier,
            bus,
            supersession,
            activations: Arc::default(),
        }
    }

    /// Checks a transition against the table.
    pub fn validate(from: QuotationState, to: QuotationState) -> SyncResult<()> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(SyncError::invalid_transition(from, to))
        }
    }

    /// The cascade used on forced activations.
    pub fn supersession(&self) -> &ActiveSupersession {
        &self.supersession
    }

    /// Moves a quotation to `request.state`.
    ///
    /// Rejections (`InvalidTransition`, `ActiveConflict`, `NotFound`) happen
    /// before anything is written. If the record moves between the read and
    /// the write it is read and validated again, up to
    /// [`MAX_WRITE_ATTEMPTS`] times before failing with `StaleWrite`.
    /// Notification and audit failures after the write are logged and do not
    /// undo it.
    pub async fn transition(
        &self,
        id: QuotationId,
        request: StateChangeRequest,
        actor: &Actor,
    ) -> SyncResult<TransitionOutcome> {
        let to = request.state;
        let mut before = self.store.get(id).await?;
        let mut attempt = 1;

        let (before, record, activation) = loop {
            let activation = if to == QuotationState::Activa {
                Some(self.activations.acquire(&before.client_email).await)
            } else {
                None
            };

            self.check(&before, &request).await?;

            let patch = QuotationPatch::state(to).expecting(before.version);
            match self.store.update(id, patch).await {
                Ok(record) => break (before, record, activation),
                Err(SyncError::StaleWrite { actual, .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::debug!(
                        record_id = %id,
                        expected = before.version,
                        actual,
                        "record moved before the write, re-reading"
                    );
                    drop(activation);
                    attempt += 1;
                    before = self.store.get(id).await?;
                }
                Err(e) => return Err(e),
            }
        };
        let from = before.state;

        tracing::info!(
            record_id = %id,
            %from,
            %to,
            force = request.force,
            actor = %actor.id,
            version = record.version,
            "quotation state changed"
        );

        let superseded = if to == QuotationState::Activa && request.force {
            self.supersession.supersede(&record, actor).await?
        } else {
            Vec::new()
        };
        drop(activation);

        if to.notifies_staff() {
            self.notify_staff(&record, from).await;
        }

        let entry = AuditEntry::quotation(
            STATE_CHANGE_ACTION,
            id,
            actor,
            json!({
                "from": from,
                "to": to,
                "force": request.force,
                "changes": record_changes(&before, &record),
                "superseded": superseded.iter().map(|q| q.id).collect::<Vec<_>>(),
            }),
        );
        if let Err(e) = self.audit.record_audit(entry).await {
            tracing::warn!(record_id = %id, error = %e, "audit write failed");
        }

        self.bus.emit(SyncEvent::state_changed(id, from, to));
        for sibling in &superseded {
            self.bus.emit(SyncEvent::state_changed(
                sibling.id,
                QuotationState::Activa,
                sibling.state,
            ));
        }

        Ok(TransitionOutcome {
            record,
            previous: from,
            superseded,
        })
    }

    /// The table check and, for an un-forced activation, the sibling check.
    async fn check(&self, before: &Quotation, request: &StateChangeRequest) -> SyncResult<()> {
        let (from, to) = (before.state, request.state);
        if let Err(e) = Self::validate(from, to) {
            tracing::debug!(record_id = %before.id, %from, %to, "transition rejected");
            return Err(e);
        }

        if to == QuotationState::Activa && !request.force {
            let siblings = self.supersession.active_siblings(before).await?;
            if let Some(existing) = siblings.first() {
                tracing::debug!(
                    record_id = %before.id,
                    existing = %existing.id,
                    "activation refused, client already has an active quotation"
                );
                return Err(SyncError::ActiveConflict {
                    existing: existing.id,
                    client: before.client_email.clone(),
                });
            }
        }
        Ok(())
    }

    async fn notify_staff(&self, record: &Quotation, from: QuotationState) {
        let recipients = match self.notifier.staff_recipients().await {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::warn!(record_id = %record.id, error = %e, "could not list staff");
                return;
            }
        };

        let title = format!("Quotation {}", record.state);
        let body = format!(
            "Quotation {} for {} moved from {} to {}",
            record.id, record.client_email, from, record.state
        );
        for user_id in recipients {
            if let Err(e) = self.notifier.notify(&user_id, &title, &body).await {
                tracing::warn!(
                    record_id = %record.id,
                    user_id = %user_id,
                    error = %e,
                    "notification failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for QuotationStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotationStateMachine").finish_non_exhaustive()
    }
}

//! Conflict resolution.

use crate::bus::SyncEventBus;
use crate::collaborators::{QuotationCache, QuotationStore};
use crate::error::SyncResult;
use quotesync_protocol::{
    merge_fields, ConflictInfo, Fields, Quotation, QuotationPatch, ResolutionStrategy, SyncEvent,
};
use std::sync::Arc;

/// Outcome of resolving a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The cache now holds this record.
    Applied(Quotation),
    /// Nothing changed; the conflict will be detected again.
    Deferred(ConflictInfo),
}

impl Resolution {
    /// The record now cached, if the resolution was applied.
    pub fn record(&self) -> Option<&Quotation> {
        match self {
            Resolution::Applied(record) => Some(record),
            Resolution::Deferred(_) => None,
        }
    }

    /// Returns true if the conflict is still open.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Resolution::Deferred(_))
    }
}

/// Applies a resolution strategy to a detected conflict.
///
/// The resolver never picks a strategy by itself; the caller decides.
#[derive(Clone)]
pub struct ConflictResolver {
    store: Arc<dyn QuotationStore>,
    cache: Arc<dyn QuotationCache>,
    bus: SyncEventBus,
}

impl ConflictResolver {
    /// Creates a resolver.
    pub fn new(
        store: Arc<dyn QuotationStore>,
        cache: Arc<dyn QuotationCache>,
        bus: SyncEventBus,
    ) -> Self {
        Self { store, cache, bus }
    }

    /// Resolves `conflict` with `strategy`.
    ///
    /// Server writes and cache writes are surfaced as errors; nothing is
    /// retried here.
    pub async fn resolve(
        &self,
        conflict: ConflictInfo,
        strategy: ResolutionStrategy,
    ) -> SyncResult<Resolution> {
        let id = conflict.record_id;
        tracing::debug!(record_id = %id, %strategy, "resolving conflict");

        let record = match strategy {
            ResolutionStrategy::KeepLocal => {
                self.push(&conflict, conflict.local.fields.clone()).await?
            }
            ResolutionStrategy::KeepServer => {
                self.cache.put(conflict.server.clone()).await?;
                conflict.server
            }
            ResolutionStrategy::Merge => {
                let merged = merge_fields(&conflict.local.fields, &conflict.server.fields);
                if merged == conflict.server.fields {
                    self.cache.put(conflict.server.clone()).await?;
                    conflict.server
                } else {
                    self.push(&conflict, merged).await?
                }
            }
            ResolutionStrategy::Defer => {
                self.bus.mark_stale(id);
                tracing::debug!(record_id = %id, "conflict deferred");
                return Ok(Resolution::Deferred(conflict));
            }
        };

        tracing::info!(
            record_id = %id,
            %strategy,
            version = record.version,
            "conflict resolved"
        );
        self.bus.emit(SyncEvent::resolved(&record, strategy));
        Ok(Resolution::Applied(record))
    }

    /// Writes `fields` to the server as a new version and caches the result.
    async fn push(&self, conflict: &ConflictInfo, fields: Fields) -> SyncResult<Quotation> {
        let record = self
            .store
            .update(conflict.record_id, QuotationPatch::fields(fields))
            .await?;
        self.cache.put(record.clone()).await?;
        Ok(record)
    }
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::memory::{MemoryCache, MemoryQuotationStore};
    use quotesync_protocol::{QuotationId, SyncEventKind, SyncEventPayload};
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryQuotationStore>,
        cache: Arc<MemoryCache>,
        bus: SyncEventBus,
        resolver: ConflictResolver,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryQuotationStore::new());
        let cache = Arc::new(MemoryCache::new());
        let bus = SyncEventBus::new();
        let resolver = ConflictResolver::new(store.clone(), cache.clone(), bus.clone());
        Fixture {
            store,
            cache,
            bus,
            resolver,
        }
    }

    /// local v3 {empresa: Old, notas: local-only}, server v4 {empresa: New, iva: 16}.
    fn seeded(f: &Fixture) -> ConflictInfo {
        let id = QuotationId::new();
        let mut server_fields = Fields::new();
        server_fields.insert("empresa".into(), json!("New"));
        server_fields.insert("iva".into(), json!(16));
        let mut server = Quotation::new(id, "c@example.com", server_fields);
        server.version = 4;

        let mut local = server.clone();
        local.version = 3;
        local.fields.remove("iva");
        local.set_field("empresa", json!("Old"));
        local.set_field("notas", json!("call first"));

        f.store.insert(server.clone());
        f.cache.insert(local.clone());
        ConflictInfo::new(local, server, vec!["empresa".into()])
    }

    #[tokio::test]
    async fn keep_server_adopts_server_copy() {
        let f = fixture();
        let conflict = seeded(&f);
        let id = conflict.record_id;

        let resolution = f
            .resolver
            .resolve(conflict, ResolutionStrategy::KeepServer)
            .await
            .unwrap();

        let cached = f.cache.snapshot(id).unwrap();
        assert_eq!(cached.field("empresa"), Some(&json!("New")));
        assert_eq!(cached.version, 4);
        assert_eq!(resolution.record(), Some(&cached));
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn keep_local_pushes_new_version() {
        let f = fixture();
        let conflict = seeded(&f);
        let id = conflict.record_id;
        let local_fields = conflict.local.fields.clone();

        f.resolver
            .resolve(conflict, ResolutionStrategy::KeepLocal)
            .await
            .unwrap();

        let server = f.store.snapshot(id).unwrap();
        assert_eq!(server.version, 5);
        assert_eq!(server.fields, local_fields);
        assert_eq!(f.cache.snapshot(id), Some(server));
    }

    #[tokio::test]
    async fn merge_prefers_server_and_keeps_one_sided_fields() {
        let f = fixture();
        let conflict = seeded(&f);
        let id = conflict.record_id;

        let resolution = f
            .resolver
            .resolve(conflict, ResolutionStrategy::Merge)
            .await
            .unwrap();
        let record = resolution.record().unwrap();

        assert_eq!(record.field("empresa"), Some(&json!("New")));
        assert_eq!(record.field("iva"), Some(&json!(16)));
        assert_eq!(record.field("notas"), Some(&json!("call first")));
        assert_eq!(record.version, 5);
        assert_eq!(f.cache.snapshot(id).as_ref(), Some(record));
    }

    #[tokio::test]
    async fn merge_of_identical_copies_is_a_no_op() {
        let f = fixture();
        let mut server = Quotation::new(QuotationId::new(), "c@example.com", Fields::new());
        server.set_field("empresa", json!("Acme"));
        f.store.insert(server.clone());
        let conflict = ConflictInfo::new(server.clone(), server.clone(), Vec::new());

        let resolution = f
            .resolver
            .resolve(conflict, ResolutionStrategy::Merge)
            .await
            .unwrap();

        assert_eq!(resolution, Resolution::Applied(server.clone()));
        assert_eq!(f.store.write_count(), 0);
        assert_eq!(f.cache.snapshot(server.id), Some(server));
    }

    #[tokio::test]
    async fn defer_marks_stale_and_changes_nothing() {
        let f = fixture();
        let conflict = seeded(&f);
        let id = conflict.record_id;
        let local = conflict.local.clone();

        let resolution = f
            .resolver
            .resolve(conflict.clone(), ResolutionStrategy::Defer)
            .await
            .unwrap();

        assert_eq!(resolution, Resolution::Deferred(conflict));
        assert!(f.bus.is_stale(id));
        assert_eq!(f.cache.snapshot(id), Some(local));
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn applied_resolution_emits_update() {
        let f = fixture();
        let conflict = seeded(&f);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = f.bus.subscribe(SyncEventKind::Updated, move |event| {
            s.lock().push(event.payload.clone());
        });

        f.resolver
            .resolve(conflict, ResolutionStrategy::KeepServer)
            .await
            .unwrap();

        assert_eq!(
            *seen.lock(),
            vec![Some(SyncEventPayload::Resolution {
                strategy: ResolutionStrategy::KeepServer,
                version: 4,
            })]
        );
    }

    #[tokio::test]
    async fn push_failure_leaves_cache_alone() {
        let f = fixture();
        let conflict = seeded(&f);
        let id = conflict.record_id;
        let local = conflict.local.clone();
        f.store.set_available(false);

        let err = f
            .resolver
            .resolve(conflict, ResolutionStrategy::KeepLocal)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Persistence(_)));
        assert_eq!(f.cache.snapshot(id), Some(local));
    }
}

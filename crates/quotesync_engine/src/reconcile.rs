//! Cache/server reconciliation.

use crate::bus::SyncEventBus;
use crate::collaborators::{QuotationCache, QuotationStore};
use crate::config::WatchedFields;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use quotesync_protocol::{watched_differences, ConflictInfo, Quotation, QuotationId, SyncEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

type PassResult = SyncResult<Option<ConflictInfo>>;
type PassCell = Arc<OnceCell<PassResult>>;

/// Compares cached copies against the server and detects conflicts.
///
/// A conflict is reported only when the versions differ AND at least one
/// watched field differs. In every other case the server copy becomes the
/// cache baseline. At most one pass per record id runs at a time; callers
/// arriving while a pass is in flight share its result.
///
/// Cloning yields a handle sharing the same in-flight table.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn QuotationStore>,
    cache: Arc<dyn QuotationCache>,
    bus: SyncEventBus,
    watched: Arc<WatchedFields>,
    in_flight: Arc<Mutex<HashMap<QuotationId, PassCell>>>,
}

impl ReconciliationEngine {
    /// Creates an engine comparing the given watched fields.
    pub fn new(
        store: Arc<dyn QuotationStore>,
        cache: Arc<dyn QuotationCache>,
        bus: SyncEventBus,
        watched: WatchedFields,
    ) -> Self {
        Self {
            store,
            cache,
            bus,
            watched: Arc::new(watched),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The fields compared by this engine.
    pub fn watched_fields(&self) -> &WatchedFields {
        &self.watched
    }

    /// Number of passes currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Reconciles one record.
    ///
    /// Returns `Ok(Some(conflict))` when the copies diverge and an explicit
    /// resolution is needed, `Ok(None)` when the cache now holds the server
    /// copy. Store and cache failures are returned to the caller.
    pub async fn reconcile(&self, id: QuotationId) -> PassResult {
        let cell = {
            let mut in_flight = self.in_flight.lock();
            Arc::clone(in_flight.entry(id).or_default())
        };

        let result = cell.get_or_init(|| self.run_pass(id)).await.clone();

        {
            let mut in_flight = self.in_flight.lock();
            if in_flight
                .get(&id)
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
            {
                in_flight.remove(&id);
            }
        }
        result
    }

    /// Reconciles several records concurrently.
    ///
    /// Results come back in the order of `ids`. Duplicate ids share a pass.
    pub async fn reconcile_many<I>(&self, ids: I) -> Vec<(QuotationId, PassResult)>
    where
        I: IntoIterator<Item = QuotationId>,
    {
        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let engine = self.clone();
                (id, tokio::spawn(async move { engine.reconcile(id).await }))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(SyncError::Protocol(format!(
                    "reconciliation task failed: {e}"
                ))),
            };
            results.push((id, result));
        }
        results
    }

    async fn run_pass(&self, id: QuotationId) -> PassResult {
        let server = self.store.get(id).await?;
        let local = self.cache.get(id).await?;

        let local = match local {
            Some(local) => local,
            None => {
                tracing::debug!(record_id = %id, "no cached copy, adopting server copy");
                self.adopt(server, None).await?;
                return Ok(None);
            }
        };

        if local.version == server.version {
            self.adopt(server, Some(&local)).await?;
            return Ok(None);
        }

        let conflicting = watched_differences(&local.fields, &server.fields, self.watched.iter());
        if conflicting.is_empty() {
            tracing::debug!(
                record_id = %id,
                local_version = local.version,
                server_version = server.version,
                "versions differ without content divergence"
            );
            self.adopt(server, Some(&local)).await?;
            return Ok(None);
        }

        tracing::info!(
            record_id = %id,
            local_version = local.version,
            server_version = server.version,
            fields = ?conflicting,
            "conflict detected"
        );
        Ok(Some(ConflictInfo::new(local, server, conflicting)))
    }

    /// Makes the server copy the cache baseline.
    async fn adopt(&self, server: Quotation, previous: Option<&Quotation>) -> SyncResult<()> {
        let changed = previous != Some(&server);
        self.cache.put(server.clone()).await?;
        if changed {
            self.bus.emit(SyncEvent::updated(&server));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("watched", &self.watched)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::QuotationStore as _;
    use crate::memory::{MemoryCache, MemoryQuotationStore};
    use quotesync_protocol::{Fields, QuotationPatch, SyncEventKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryQuotationStore>,
        cache: Arc<MemoryCache>,
        bus: SyncEventBus,
        engine: ReconciliationEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryQuotationStore::new());
        let cache = Arc::new(MemoryCache::new());
        let bus = SyncEventBus::new();
        let engine = ReconciliationEngine::new(
            store.clone(),
            cache.clone(),
            bus.clone(),
            WatchedFields::default(),
        );
        Fixture {
            store,
            cache,
            bus,
            engine,
        }
    }

    fn quotation(version: u64, empresa: &str) -> Quotation {
        let mut fields = Fields::new();
        fields.insert("empresa".into(), json!(empresa));
        fields.insert("items".into(), json!([{"sku": "A-1", "qty": 2}]));
        let mut q = Quotation::new(QuotationId::new(), "cliente@example.com", fields);
        q.version = version;
        q
    }

    #[tokio::test]
    async fn equal_versions_never_conflict() {
        let f = fixture();
        let server = quotation(4, "New");
        let mut local = server.clone();
        local.set_field("empresa", json!("Old"));
        f.store.insert(server.clone());
        f.cache.insert(local);

        assert_eq!(f.engine.reconcile(server.id).await, Ok(None));
        assert_eq!(f.cache.snapshot(server.id), Some(server));
    }

    #[tokio::test]
    async fn identical_copies_do_not_emit() {
        let f = fixture();
        let server = quotation(2, "Acme");
        f.store.insert(server.clone());
        f.cache.insert(server.clone());

        let emitted = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&emitted);
        let _sub = f.bus.subscribe(SyncEventKind::Updated, move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(f.engine.reconcile(server.id).await, Ok(None));
        assert_eq!(emitted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn divergent_watched_field_is_reported() {
        let f = fixture();
        let server = quotation(4, "New");
        let mut local = server.clone();
        local.version = 3;
        local.set_field("empresa", json!("Old"));
        f.store.insert(server.clone());
        f.cache.insert(local.clone());

        let conflict = f
            .engine
            .reconcile(server.id)
            .await
            .unwrap()
            .expect("conflict");
        assert_eq!(conflict.conflicting_fields, vec!["empresa".to_string()]);
        assert_eq!(conflict.local_version, 3);
        assert_eq!(conflict.server_version, 4);
        // Cache is untouched until the conflict is resolved.
        assert_eq!(f.cache.snapshot(server.id), Some(local));
    }

    #[tokio::test]
    async fn unwatched_difference_adopts_server() {
        let f = fixture();
        let server = quotation(5, "Acme");
        let mut local = server.clone();
        local.version = 4;
        local.set_field("internalNote", json!("scratch"));
        f.store.insert(server.clone());
        f.cache.insert(local);

        let updates = Arc::new(AtomicUsize::new(0));
        let u = Arc::clone(&updates);
        let _sub = f.bus.subscribe(SyncEventKind::Updated, move |_| {
            u.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(f.engine.reconcile(server.id).await, Ok(None));
        assert_eq!(f.cache.snapshot(server.id), Some(server));
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn array_order_matters() {
        let f = fixture();
        let mut server = quotation(2, "Acme");
        server.set_field("items", json!(["a", "b"]));
        let mut local = server.clone();
        local.version = 1;
        local.set_field("items", json!(["b", "a"]));
        f.store.insert(server.clone());
        f.cache.insert(local);

        let conflict = f.engine.reconcile(server.id).await.unwrap().unwrap();
        assert_eq!(conflict.conflicting_fields, vec!["items".to_string()]);
    }

    #[tokio::test]
    async fn missing_cache_entry_adopts_server() {
        let f = fixture();
        let server = quotation(1, "Acme");
        f.store.insert(server.clone());

        assert_eq!(f.engine.reconcile(server.id).await, Ok(None));
        assert_eq!(f.cache.snapshot(server.id), Some(server));
    }

    #[tokio::test]
    async fn missing_server_record_is_an_error() {
        let f = fixture();
        let id = QuotationId::new();
        assert_eq!(f.engine.reconcile(id).await, Err(SyncError::NotFound(id)));
        assert_eq!(f.engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn store_failure_surfaces_to_caller() {
        let f = fixture();
        let server = quotation(1, "Acme");
        f.store.insert(server.clone());
        f.store.set_available(false);

        let err = f.engine.reconcile(server.id).await.unwrap_err();
        assert!(matches!(err, SyncError::Persistence(_)));
        assert_eq!(f.engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn duplicate_ids_share_a_pass() {
        let f = fixture();
        let server = quotation(2, "Acme");
        f.store.insert(server.clone());
        f.cache.insert(server.clone());
        f.store.set_latency(Duration::from_millis(50));

        let results = f
            .engine
            .reconcile_many([server.id, server.id, server.id])
            .await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(id, r)| *id == server.id && r == &Ok(None)));
        assert_eq!(f.store.read_count(), 1);
        assert_eq!(f.engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_store_read() {
        let f = fixture();
        let server = quotation(3, "Acme");
        let mut local = server.clone();
        local.version = 2;
        local.set_field("empresa", json!("Acme Ltda"));
        f.store.insert(server.clone());
        f.cache.insert(local);
        f.store.set_latency(Duration::from_millis(50));

        let (a, b, c, d) = tokio::join!(
            f.engine.reconcile(server.id),
            f.engine.reconcile(server.id),
            f.engine.reconcile(server.id),
            f.engine.reconcile(server.id),
        );

        assert_eq!(f.store.read_count(), 1);
        let conflict = a.unwrap().unwrap();
        assert_eq!(conflict.conflicting_fields, vec!["empresa".to_string()]);
        for other in [b, c, d] {
            assert_eq!(other, Ok(Some(conflict.clone())));
        }
        assert_eq!(f.engine.in_flight(), 0);

        // A later call starts a fresh pass.
        f.engine.reconcile(server.id).await.unwrap();
        assert_eq!(f.store.read_count(), 2);
    }

    #[tokio::test]
    async fn reconcile_many_keeps_input_order() {
        let f = fixture();
        let a = quotation(1, "A");
        let b = quotation(1, "B");
        f.store.insert(a.clone());
        f.store.insert(b.clone());
        f.store
            .update(b.id, QuotationPatch::fields(Fields::new()))
            .await
            .unwrap();

        let missing = QuotationId::new();
        let results = f.engine.reconcile_many([b.id, missing, a.id]).await;
        let ids: Vec<_> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![b.id, missing, a.id]);
        assert_eq!(results[1].1, Err(SyncError::NotFound(missing)));
    }
}

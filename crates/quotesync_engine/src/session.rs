//! Reconnect-driven sync orchestration.
//!
//! A [`SyncSession`] wires the pieces together: the connection monitor
//! detects a reconnect, the tracked and stale records are reconciled, and
//! every conflict goes to a [`ConflictDecider`] before the resolver applies
//! the chosen strategy.

use crate::bus::SyncEventBus;
use crate::collaborators::{QuotationCache, QuotationStore, ReachabilityProbe};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::monitor::ConnectionMonitor;
use crate::reconcile::ReconciliationEngine;
use crate::resolver::{ConflictResolver, Resolution};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use quotesync_protocol::{ConflictInfo, Quotation, QuotationId, ResolutionStrategy};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Picks the strategy for a detected conflict.
///
/// This is where a human prompt or an automatic policy plugs in.
#[async_trait]
pub trait ConflictDecider: Send + Sync {
    /// Chooses how to settle `conflict`.
    async fn decide(&self, conflict: &ConflictInfo) -> ResolutionStrategy;
}

/// Defers every conflict, leaving it pending for an explicit decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferDecider;

#[async_trait]
impl ConflictDecider for DeferDecider {
    async fn decide(&self, _conflict: &ConflictInfo) -> ResolutionStrategy {
        ResolutionStrategy::Defer
    }
}

/// Applies the same strategy to every conflict.
#[derive(Debug, Clone, Copy)]
pub struct FixedStrategy(pub ResolutionStrategy);

#[async_trait]
impl ConflictDecider for FixedStrategy {
    async fn decide(&self, _conflict: &ConflictInfo) -> ResolutionStrategy {
        self.0
    }
}

/// Statistics about sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of records reconciled.
    pub records_checked: u64,
    /// Total number of conflicts detected.
    pub conflicts_detected: u64,
    /// Conflicts settled by a strategy.
    pub conflicts_resolved: u64,
    /// Conflicts left pending.
    pub conflicts_deferred: u64,
    /// Reconciliations or resolutions that failed.
    pub failures: u64,
    /// Last sync time.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Number of records reconciled.
    pub checked: usize,
    /// Records rewritten by a resolution.
    pub resolved: Vec<Quotation>,
    /// Conflicts left pending.
    pub deferred: Vec<ConflictInfo>,
    /// Records whose reconciliation or resolution failed.
    pub failures: Vec<(QuotationId, SyncError)>,
    /// Duration of the cycle.
    pub duration: Duration,
}

impl SyncReport {
    /// Returns true if nothing failed.
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

struct SessionInner {
    monitor: ConnectionMonitor,
    reconciler: ReconciliationEngine,
    resolver: ConflictResolver,
    bus: SyncEventBus,
    decider: RwLock<Arc<dyn ConflictDecider>>,
    tracked: RwLock<BTreeSet<QuotationId>>,
    pending: Mutex<BTreeMap<QuotationId, ConflictInfo>>,
    stats: RwLock<SyncStats>,
    interval: Duration,
}

impl SessionInner {
    async fn sync_now(&self) -> SyncReport {
        let started = std::time::Instant::now();
        let mut ids = self.tracked.read().clone();
        ids.extend(self.bus.drain_stale());

        tracing::debug!(records = ids.len(), "sync cycle started");
        let results = self.reconciler.reconcile_many(ids).await;

        let mut report = SyncReport {
            checked: results.len(),
            ..SyncReport::default()
        };
        let mut detected = 0u64;

        for (id, result) in results {
            let conflict = match result {
                Ok(None) => {
                    self.pending.lock().remove(&id);
                    continue;
                }
                Ok(Some(conflict)) => conflict,
                Err(e) => {
                    tracing::warn!(record_id = %id, error = %e, "reconciliation failed");
                    report.failures.push((id, e));
                    continue;
                }
            };
            detected += 1;

            let decider = Arc::clone(&*self.decider.read());
            let strategy = decider.decide(&conflict).await;
            match self.resolver.resolve(conflict, strategy).await {
                Ok(Resolution::Applied(record)) => {
                    self.pending.lock().remove(&id);
                    report.resolved.push(record);
                }
                Ok(Resolution::Deferred(conflict)) => {
                    self.pending.lock().insert(id, conflict.clone());
                    report.deferred.push(conflict);
                }
                Err(e) => {
                    tracing::warn!(record_id = %id, %strategy, error = %e, "resolution failed");
                    report.failures.push((id, e));
                }
            }
        }
        report.duration = started.elapsed();

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.records_checked += report.checked as u64;
            stats.conflicts_detected += detected;
            stats.conflicts_resolved += report.resolved.len() as u64;
            stats.conflicts_deferred += report.deferred.len() as u64;
            stats.failures += report.failures.len() as u64;
            stats.last_sync_time = Some(Utc::now());
            if let Some((_, e)) = report.failures.last() {
                stats.last_error = Some(e.to_string());
            }
        }

        tracing::info!(
            checked = report.checked,
            resolved = report.resolved.len(),
            deferred = report.deferred.len(),
            failed = report.failures.len(),
            "sync cycle complete"
        );
        report
    }
}

/// Keeps a set of quotations in sync across reconnects.
pub struct SyncSession {
    inner: Arc<SessionInner>,
    reconnects: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncSession {
    /// Creates a session. Conflicts are deferred until a decider is set.
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn QuotationStore>,
        cache: Arc<dyn QuotationCache>,
        probe: Arc<dyn ReachabilityProbe>,
        bus: SyncEventBus,
    ) -> Self {
        let monitor = ConnectionMonitor::new(probe, config.monitor.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        monitor.on_reconnect(move || {
            let _ = tx.send(());
        });

        let reconciler = ReconciliationEngine::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            bus.clone(),
            config.watched_fields.clone(),
        );
        let resolver = ConflictResolver::new(store, cache, bus.clone());

        Self {
            inner: Arc::new(SessionInner {
                monitor,
                reconciler,
                resolver,
                bus,
                decider: RwLock::new(Arc::new(DeferDecider)),
                tracked: RwLock::new(BTreeSet::new()),
                pending: Mutex::new(BTreeMap::new()),
                stats: RwLock::new(SyncStats::default()),
                interval: config.monitor.interval,
            }),
            reconnects: Arc::new(tokio::sync::Mutex::new(rx)),
            worker: Mutex::new(None),
        }
    }

    /// Sets the policy used for conflicts found by sync cycles.
    pub fn set_decider(&self, decider: Arc<dyn ConflictDecider>) {
        *self.inner.decider.write() = decider;
    }

    /// Adds a record to the tracked set.
    pub fn track(&self, id: QuotationId) -> bool {
        self.inner.tracked.write().insert(id)
    }

    /// Removes a record from the tracked set and drops its pending conflict.
    pub fn untrack(&self, id: QuotationId) -> bool {
        self.inner.pending.lock().remove(&id);
        self.inner.tracked.write().remove(&id)
    }

    /// Tracked ids, sorted.
    pub fn tracked(&self) -> Vec<QuotationId> {
        self.inner.tracked.read().iter().copied().collect()
    }

    /// Starts the monitor and the reconnect worker.
    ///
    /// Every reconnect edge clears the monitor's sticky reconnect flag and
    /// runs a sync cycle. An edge that lands while a cycle is running sets
    /// the flag again and gets a cycle of its own. Must be called from within
    /// a tokio runtime.
    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        let reconnects = Arc::clone(&self.reconnects);
        let handle = tokio::spawn(async move {
            let mut reconnects = reconnects.lock().await;
            while reconnects.recv().await.is_some() {
                if !inner.monitor.has_reconnected() {
                    continue;
                }
                inner.monitor.clear_reconnected();
                tracing::info!("reconnected, syncing tracked quotations");
                inner.sync_now().await;
            }
        });
        if let Some(previous) = self.worker.lock().replace(handle) {
            previous.abort();
        }
        self.inner.monitor.start(self.inner.interval);
    }

    /// Runs a sync cycle now, whatever the connection state.
    pub async fn sync_now(&self) -> SyncReport {
        self.inner.sync_now().await
    }

    /// Conflicts waiting for an explicit decision, by record id.
    pub fn pending_conflicts(&self) -> Vec<ConflictInfo> {
        self.inner.pending.lock().values().cloned().collect()
    }

    /// Resolves a pending conflict with an explicit strategy.
    ///
    /// Returns `Ok(None)` if nothing is pending for `id`. On failure, or if
    /// the strategy defers again, the conflict stays pending.
    pub async fn resolve_pending(
        &self,
        id: QuotationId,
        strategy: ResolutionStrategy,
    ) -> SyncResult<Option<Resolution>> {
        let conflict = match self.inner.pending.lock().remove(&id) {
            Some(conflict) => conflict,
            None => return Ok(None),
        };

        match self.inner.resolver.resolve(conflict.clone(), strategy).await {
            Ok(resolution) => {
                let mut stats = self.inner.stats.write();
                match &resolution {
                    Resolution::Applied(_) => stats.conflicts_resolved += 1,
                    Resolution::Deferred(conflict) => {
                        stats.conflicts_deferred += 1;
                        self.inner.pending.lock().insert(id, conflict.clone());
                    }
                }
                Ok(Some(resolution))
            }
            Err(e) => {
                self.inner.pending.lock().insert(id, conflict);
                let mut stats = self.inner.stats.write();
                stats.failures += 1;
                stats.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// The connection monitor.
    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.inner.monitor
    }

    /// The reconciliation engine.
    pub fn reconciler(&self) -> &ReconciliationEngine {
        &self.inner.reconciler
    }

    /// The conflict resolver.
    pub fn resolver(&self) -> &ConflictResolver {
        &self.inner.resolver
    }

    /// The event bus.
    pub fn bus(&self) -> &SyncEventBus {
        &self.inner.bus
    }

    /// Returns true while the worker runs.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stops the monitor and the worker. A cycle in progress is cancelled.
    pub fn shutdown(&self) {
        self.inner.monitor.stop();
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
        tracing::debug!("sync session shut down");
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("tracked", &self.inner.tracked.read().len())
            .field("pending", &self.inner.pending.lock().len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCache, MemoryQuotationStore, MockProbe};
    use quotesync_protocol::Fields;
    use serde_json::json;

    fn session() -> (Arc<MemoryQuotationStore>, Arc<MemoryCache>, SyncSession) {
        let store = Arc::new(MemoryQuotationStore::new());
        let cache = Arc::new(MemoryCache::new());
        let session = SyncSession::new(
            &SyncConfig::default(),
            store.clone(),
            cache.clone(),
            Arc::new(MockProbe::new(true)),
            SyncEventBus::new(),
        );
        (store, cache, session)
    }

    fn diverged(store: &MemoryQuotationStore, cache: &MemoryCache) -> QuotationId {
        let mut server = Quotation::new(QuotationId::new(), "c@example.com", Fields::new());
        server.version = 4;
        server.set_field("empresa", json!("New"));
        let mut local = server.clone();
        local.version = 3;
        local.set_field("empresa", json!("Old"));
        store.insert(server.clone());
        cache.insert(local);
        server.id
    }

    #[tokio::test]
    async fn default_decider_keeps_conflicts_pending() {
        let (store, cache, session) = session();
        let id = diverged(&store, &cache);
        session.track(id);

        let report = session.sync_now().await;
        assert_eq!(report.checked, 1);
        assert_eq!(report.deferred.len(), 1);
        assert_eq!(session.pending_conflicts().len(), 1);

        let stats = session.stats();
        assert_eq!(stats.cycles_completed, 1);
        assert_eq!(stats.conflicts_detected, 1);
        assert_eq!(stats.conflicts_deferred, 1);
    }

    #[tokio::test]
    async fn fixed_strategy_resolves_during_sync() {
        let (store, cache, session) = session();
        let id = diverged(&store, &cache);
        session.track(id);
        session.set_decider(Arc::new(FixedStrategy(ResolutionStrategy::KeepServer)));

        let report = session.sync_now().await;
        assert_eq!(report.resolved.len(), 1);
        assert!(session.pending_conflicts().is_empty());
        assert_eq!(cache.snapshot(id).unwrap().field("empresa"), Some(&json!("New")));
    }

    #[tokio::test]
    async fn resolve_pending_settles_conflict() {
        let (store, cache, session) = session();
        let id = diverged(&store, &cache);
        session.track(id);
        session.sync_now().await;

        let resolution = session
            .resolve_pending(id, ResolutionStrategy::KeepLocal)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolution.record().unwrap().version, 5);
        assert!(session.pending_conflicts().is_empty());
        assert_eq!(
            session.resolve_pending(id, ResolutionStrategy::Merge).await,
            Ok(None)
        );
    }

    #[tokio::test]
    async fn deferred_records_are_rechecked_even_if_untracked() {
        let (store, cache, session) = session();
        let id = diverged(&store, &cache);
        session.track(id);
        session.sync_now().await;
        assert!(session.bus().is_stale(id));

        session.untrack(id);
        let report = session.sync_now().await;
        assert_eq!(report.checked, 1);
        assert_eq!(report.deferred.len(), 1);
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let (_store, _cache, session) = session();
        let missing = QuotationId::new();
        session.track(missing);

        let report = session.sync_now().await;
        assert!(!report.success());
        assert_eq!(report.failures, vec![(missing, SyncError::NotFound(missing))]);
        assert!(session.stats().last_error.is_some());
    }
}

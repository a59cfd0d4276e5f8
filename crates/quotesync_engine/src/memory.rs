//! In-memory collaborators.
//!
//! Used by tests and by single-process deployments. Each one can be told to
//! fail so error paths can be exercised.

use crate::collaborators::{
    AuditEntry, AuditSink, Notifier, QuotationCache, QuotationStore, ReachabilityProbe,
};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use quotesync_protocol::{CreateQuotationRequest, Quotation, QuotationId, QuotationPatch};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// An in-memory authoritative store.
///
/// `update` holds the write lock for the whole read-modify-write, so a
/// patch's version guard is checked and applied in one step.
#[derive(Debug)]
pub struct MemoryQuotationStore {
    records: RwLock<HashMap<QuotationId, Quotation>>,
    available: AtomicBool,
    writes: AtomicU64,
    reads: AtomicU64,
    latency: Mutex<Duration>,
}

impl MemoryQuotationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Inserts a record as-is, without bumping its version.
    pub fn insert(&self, record: Quotation) {
        self.records.write().insert(record.id, record);
    }

    /// Returns a copy of a record without going through the async API.
    pub fn snapshot(&self, id: QuotationId) -> Option<Quotation> {
        self.records.read().get(&id).cloned()
    }

    /// Returns copies of every record.
    pub fn all(&self) -> Vec<Quotation> {
        self.records.read().values().cloned().collect()
    }

    /// Number of successful `update` calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `get` calls, including failed ones.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Makes every async call wait `latency` before touching the records.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Simulates the backing store going away or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> SyncResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Persistence("store unavailable".into()))
        }
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MemoryQuotationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuotationStore for MemoryQuotationStore {
    async fn get(&self, id: QuotationId) -> SyncResult<Quotation> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.check_available()?;
        self.snapshot(id).ok_or(SyncError::NotFound(id))
    }

    async fn update(&self, id: QuotationId, patch: QuotationPatch) -> SyncResult<Quotation> {
        self.delay().await;
        self.check_available()?;
        let mut records = self.records.write();
        let record = records.get_mut(&id).ok_or(SyncError::NotFound(id))?;
        if let Some(expected) = patch.expected_version {
            if record.version != expected {
                return Err(SyncError::StaleWrite {
                    id,
                    expected,
                    actual: record.version,
                });
            }
        }
        record.apply_patch(&patch, Utc::now());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(record.clone())
    }

    async fn find_by_client(&self, client_email: &str) -> SyncResult<Vec<Quotation>> {
        self.delay().await;
        self.check_available()?;
        let mut found: Vec<Quotation> = self
            .records
            .read()
            .values()
            .filter(|q| q.belongs_to(client_email))
            .cloned()
            .collect();
        found.sort_by_key(|q| q.updated_at);
        Ok(found)
    }

    async fn create(&self, request: CreateQuotationRequest) -> SyncResult<Quotation> {
        self.delay().await;
        self.check_available()?;
        let id = request.id.unwrap_or_default();
        let mut records = self.records.write();
        if records.contains_key(&id) {
            return Err(SyncError::Persistence(format!(
                "quotation {id} already exists"
            )));
        }
        let record = Quotation::new(id, request.client_email.trim(), request.fields);
        records.insert(id, record.clone());
        Ok(record)
    }

    async fn ping(&self) -> SyncResult<()> {
        self.check_available()
    }
}

/// An in-memory local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    records: RwLock<HashMap<QuotationId, Quotation>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a cached record without going through the async API.
    pub fn snapshot(&self, id: QuotationId) -> Option<Quotation> {
        self.records.read().get(&id).cloned()
    }

    /// Seeds the cache.
    pub fn insert(&self, record: Quotation) {
        self.records.write().insert(record.id, record);
    }
}

#[async_trait]
impl QuotationCache for MemoryCache {
    async fn get(&self, id: QuotationId) -> SyncResult<Option<Quotation>> {
        Ok(self.snapshot(id))
    }

    async fn put(&self, record: Quotation) -> SyncResult<()> {
        self.insert(record);
        Ok(())
    }

    async fn remove(&self, id: QuotationId) -> SyncResult<Option<Quotation>> {
        Ok(self.records.write().remove(&id))
    }

    async fn ids(&self) -> SyncResult<Vec<QuotationId>> {
        let mut ids: Vec<_> = self.records.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

/// An audit sink that keeps entries in memory.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    failing: AtomicBool,
}

impl RecordingAuditSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Returns entries about one entity.
    pub fn entries_for(&self, id: QuotationId) -> Vec<AuditEntry> {
        let id = id.to_string();
        self.entries
            .lock()
            .iter()
            .filter(|e| e.entity_id == id)
            .cloned()
            .collect()
    }

    /// Makes every subsequent write fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record_audit(&self, entry: AuditEntry) -> SyncResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Audit("audit sink failing".into()));
        }
        self.entries.lock().push(entry);
        Ok(())
    }
}

/// A notification sent through [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    /// Recipient.
    pub user_id: String,
    /// Title.
    pub title: String,
    /// Body.
    pub body: String,
}

/// A notifier that records what it sends.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    staff: Vec<String>,
    sent: Mutex<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// Creates a notifier with the given staff user ids.
    pub fn new<I, S>(staff: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            staff: staff.into_iter().map(Into::into).collect(),
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Returns every notification sent so far.
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }

    /// Makes every subsequent send fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn staff_recipients(&self) -> SyncResult<Vec<String>> {
        Ok(self.staff.clone())
    }

    async fn notify(&self, user_id: &str, title: &str, body: &str) -> SyncResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Notification("notifier failing".into()));
        }
        self.sent.lock().push(SentNotification {
            user_id: user_id.into(),
            title: title.into(),
            body: body.into(),
        });
        Ok(())
    }
}

/// A scriptable reachability probe.
#[derive(Debug)]
pub struct MockProbe {
    reachable: AtomicBool,
    erroring: AtomicBool,
    delay: Mutex<Duration>,
    calls: AtomicU64,
}

impl MockProbe {
    /// Creates a probe reporting the given reachability.
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            erroring: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicU64::new(0),
        }
    }

    /// Sets the reported reachability.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes the probe return a transport error instead of a boolean.
    pub fn set_erroring(&self, erroring: bool) {
        self.erroring.store(erroring, Ordering::SeqCst);
    }

    /// Makes each probe take this long.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Number of probes performed.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockProbe {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ReachabilityProbe for MockProbe {
    async fn probe(&self) -> SyncResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.erroring.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("probe failed"));
        }
        Ok(self.reachable.load(Ordering::SeqCst))
    }
}

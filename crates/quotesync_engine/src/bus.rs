//! In-process publish/subscribe for sync events.
//!
//! The bus is a fan-out hub, not a queue: an event reaches the subscribers
//! registered when it is emitted and nobody else. It also keeps a set of
//! record ids marked stale, which a refresher drains in batches.

use parking_lot::{Mutex, RwLock};
use quotesync_protocol::{QuotationId, SyncEvent, SyncEventKind};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

type Callback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Which event kinds a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every kind.
    All,
    /// Only the listed kinds.
    Kinds(Vec<SyncEventKind>),
}

impl EventFilter {
    /// Returns true if events of `kind` pass this filter.
    pub fn matches(&self, kind: SyncEventKind) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

impl From<SyncEventKind> for EventFilter {
    fn from(kind: SyncEventKind) -> Self {
        EventFilter::Kinds(vec![kind])
    }
}

impl From<Vec<SyncEventKind>> for EventFilter {
    fn from(kinds: Vec<SyncEventKind>) -> Self {
        EventFilter::Kinds(kinds)
    }
}

impl From<&[SyncEventKind]> for EventFilter {
    fn from(kinds: &[SyncEventKind]) -> Self {
        EventFilter::Kinds(kinds.to_vec())
    }
}

impl<const N: usize> From<[SyncEventKind; N]> for EventFilter {
    fn from(kinds: [SyncEventKind; N]) -> Self {
        EventFilter::Kinds(kinds.to_vec())
    }
}

struct Listener {
    id: u64,
    filter: EventFilter,
    callback: Callback,
}

#[derive(Default)]
struct BusInner {
    listeners: RwLock<Vec<Listener>>,
    next_id: Mutex<u64>,
    stale: Mutex<BTreeSet<QuotationId>>,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }
}

/// The sync event bus.
///
/// Cloning a bus yields another handle to the same hub.
#[derive(Clone, Default)]
pub struct SyncEventBus {
    inner: Arc<BusInner>,
}

impl SyncEventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for the given kinds.
    ///
    /// The returned handle is the only way to remove the callback; dropping
    /// it also unsubscribes.
    #[must_use = "dropping the subscription immediately unsubscribes"]
    pub fn subscribe<F>(&self, filter: impl Into<EventFilter>, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.inner.next_id.lock();
            *next += 1;
            *next
        };
        self.inner.listeners.write().push(Listener {
            id,
            filter: filter.into(),
            callback: Arc::new(callback),
        });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    /// Registers a callback for every kind.
    #[must_use = "dropping the subscription immediately unsubscribes"]
    pub fn subscribe_all<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventFilter::All, callback)
    }

    /// Delivers an event to every matching subscriber, in subscription order.
    ///
    /// Callbacks run on the caller's thread after the listener list is
    /// released, so a callback may itself emit or subscribe. Returns the
    /// number of callbacks invoked.
    pub fn emit(&self, event: SyncEvent) -> usize {
        let targets: Vec<Callback> = self
            .inner
            .listeners
            .read()
            .iter()
            .filter(|l| l.filter.matches(event.kind))
            .map(|l| Arc::clone(&l.callback))
            .collect();

        tracing::trace!(
            kind = ?event.kind,
            record_id = %event.record_id,
            listeners = targets.len(),
            "emitting sync event"
        );

        for callback in &targets {
            callback(&event);
        }
        targets.len()
    }

    /// Marks a record for lazy refresh.
    pub fn mark_stale(&self, id: QuotationId) {
        self.inner.stale.lock().insert(id);
    }

    /// Returns true if a record is marked stale.
    pub fn is_stale(&self, id: QuotationId) -> bool {
        self.inner.stale.lock().contains(&id)
    }

    /// Returns every stale id (sorted) and clears the set.
    pub fn drain_stale(&self) -> Vec<QuotationId> {
        std::mem::take(&mut *self.inner.stale.lock())
            .into_iter()
            .collect()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

impl std::fmt::Debug for SyncEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEventBus")
            .field("subscribers", &self.subscriber_count())
            .field("stale", &self.inner.stale.lock().len())
            .finish()
    }
}

/// Handle to a bus subscription.
///
/// Call [`Subscription::unsubscribe`] on teardown. Dropping the handle has
/// the same effect, so holding it is what keeps the callback registered.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    active: bool,
}

impl Subscription {
    /// Removes the callback. Returns false if it was already gone.
    pub fn unsubscribe(mut self) -> bool {
        self.release()
    }

    /// Returns true while the callback is registered.
    pub fn is_active(&self) -> bool {
        self.active && self.bus.strong_count() > 0
    }

    fn release(&mut self) -> bool {
        if !std::mem::replace(&mut self.active, false) {
            return false;
        }
        match self.bus.upgrade() {
            Some(inner) => inner.remove(self.id),
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

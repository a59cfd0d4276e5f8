//! Server reachability monitoring.
//!
//! A [`ConnectionMonitor`] probes the server on an interval, reacts to
//! runtime connectivity signals, and turns the stream of observations into
//! offline/online edges.

use crate::collaborators::ReachabilityProbe;
use crate::config::MonitorConfig;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const LINK_UNKNOWN: u8 = 0;
const LINK_OFFLINE: u8 = 1;
const LINK_ONLINE: u8 = 2;

type EdgeCallback = Arc<dyn Fn() + Send + Sync>;

/// Snapshot of a monitor's view of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    /// Whether the last observation was "reachable".
    pub is_online: bool,
    /// Whether a probe is in flight.
    pub is_checking: bool,
    /// When the last observation was recorded.
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Sticky flag set on every reconnect edge until cleared.
    pub has_reconnected: bool,
}

/// A connectivity hint from the OS or runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivitySignal {
    /// The network came back. Confirmed with a probe before it counts.
    Online,
    /// The network went away. Recorded immediately.
    Offline,
}

/// An offline/online transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEdge {
    /// offline to online.
    Reconnected,
    /// online to offline.
    Disconnected,
}

/// Delivers connectivity signals to a monitor.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<ConnectivitySignal>,
}

impl SignalSender {
    /// Queues a signal. Returns false if the monitor is gone.
    pub fn send(&self, signal: ConnectivitySignal) -> bool {
        self.tx.send(signal).is_ok()
    }
}

struct MonitorShared {
    probe: Arc<dyn ReachabilityProbe>,
    interval: RwLock<Duration>,
    link: AtomicU8,
    checking: AtomicBool,
    paused: AtomicBool,
    has_reconnected: AtomicBool,
    last_checked_at: Mutex<Option<DateTime<Utc>>>,
    on_reconnect: RwLock<Vec<EdgeCallback>>,
    on_disconnect: RwLock<Vec<EdgeCallback>>,
    interval_changed: Notify,
    probes: AtomicU64,
}

/// Resets the in-flight flag even if the probe future is dropped.
struct CheckingGuard<'a>(&'a AtomicBool);

impl Drop for CheckingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl MonitorShared {
    fn is_online(&self) -> bool {
        self.link.load(Ordering::SeqCst) == LINK_ONLINE
    }

    async fn check(&self) -> bool {
        if self
            .checking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("reachability probe already in flight, skipping");
            return self.is_online();
        }
        let guard = CheckingGuard(&self.checking);
        self.probes.fetch_add(1, Ordering::Relaxed);

        let online = match self.probe.probe().await {
            Ok(online) => online,
            Err(e) => {
                tracing::debug!(error = %e, "reachability probe failed");
                false
            }
        };
        drop(guard);

        self.record(online);
        online
    }

    /// Stores an observation and fires callbacks if it crosses an edge.
    fn record(&self, online: bool) -> Option<ConnectionEdge> {
        let next = if online { LINK_ONLINE } else { LINK_OFFLINE };
        let prev = self.link.swap(next, Ordering::SeqCst);
        *self.last_checked_at.lock() = Some(Utc::now());

        let edge = match (prev, next) {
            (LINK_OFFLINE, LINK_ONLINE) => ConnectionEdge::Reconnected,
            (LINK_ONLINE, LINK_OFFLINE) => ConnectionEdge::Disconnected,
            _ => return None,
        };

        let callbacks: Vec<EdgeCallback> = match edge {
            ConnectionEdge::Reconnected => {
                self.has_reconnected.store(true, Ordering::SeqCst);
                tracing::info!("connection restored");
                self.on_reconnect.read().clone()
            }
            ConnectionEdge::Disconnected => {
                tracing::warn!("connection lost");
                self.on_disconnect.read().clone()
            }
        };
        for callback in &callbacks {
            callback();
        }
        Some(edge)
    }

    fn spawn_check(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.check().await;
        });
    }

    fn handle_signal(self: &Arc<Self>, signal: ConnectivitySignal) {
        tracing::debug!(?signal, "connectivity signal");
        match signal {
            ConnectivitySignal::Online => self.spawn_check(),
            ConnectivitySignal::Offline => {
                self.record(false);
            }
        }
    }
}

/// Watches server reachability and reports offline/online edges.
///
/// Each monitor owns its own edge state; several monitors never share it.
/// The background task is cancelled by [`ConnectionMonitor::stop`] or when
/// the monitor is dropped. A probe already in flight is left to finish.
pub struct ConnectionMonitor {
    shared: Arc<MonitorShared>,
    signal_tx: mpsc::UnboundedSender<ConnectivitySignal>,
    signal_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ConnectivitySignal>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    /// Creates a stopped monitor.
    pub fn new(probe: Arc<dyn ReachabilityProbe>, config: MonitorConfig) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(MonitorShared {
                probe,
                interval: RwLock::new(config.interval),
                link: AtomicU8::new(LINK_UNKNOWN),
                checking: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                has_reconnected: AtomicBool::new(false),
                last_checked_at: Mutex::new(None),
                on_reconnect: RwLock::new(Vec::new()),
                on_disconnect: RwLock::new(Vec::new()),
                interval_changed: Notify::new(),
                probes: AtomicU64::new(0),
            }),
            signal_tx,
            signal_rx: Arc::new(tokio::sync::Mutex::new(signal_rx)),
            task: Mutex::new(None),
        }
    }

    /// Registers a callback fired once per offline to online edge.
    pub fn on_reconnect<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.on_reconnect.write().push(Arc::new(callback));
    }

    /// Registers a callback fired once per online to offline edge.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.on_disconnect.write().push(Arc::new(callback));
    }

    /// Starts probing every `interval`, beginning immediately.
    ///
    /// Restarting replaces the previous background task. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, interval: Duration) {
        *self.shared.interval.write() = interval;
        let shared = Arc::clone(&self.shared);
        let signals = Arc::clone(&self.signal_rx);
        let handle = tokio::spawn(run_monitor(shared, signals));

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        tracing::debug!(interval_ms = interval.as_millis() as u64, "connection monitor started");
    }

    /// Cancels the background task. Safe to call more than once.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            tracing::debug!("connection monitor stopped");
        }
    }

    /// Returns true while the background task runs.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Probes now. If a probe is already in flight, returns the last known
    /// value without probing again.
    pub async fn check_now(&self) -> bool {
        self.shared.check().await
    }

    /// Makes timer ticks skip probing. Signals and `check_now` still work.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    /// Undoes [`ConnectionMonitor::pause`].
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    /// Returns true if timer ticks are skipped.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Changes the probe interval, taking effect on a running task at once.
    pub fn set_interval(&self, interval: Duration) {
        *self.shared.interval.write() = interval;
        self.shared.interval_changed.notify_one();
    }

    /// Current probe interval.
    pub fn interval(&self) -> Duration {
        *self.shared.interval.read()
    }

    /// Returns a handle for delivering connectivity signals.
    pub fn signal_sender(&self) -> SignalSender {
        SignalSender {
            tx: self.signal_tx.clone(),
        }
    }

    /// Returns true if the last observation was "reachable".
    pub fn is_online(&self) -> bool {
        self.shared.is_online()
    }

    /// Returns the sticky reconnect flag.
    pub fn has_reconnected(&self) -> bool {
        self.shared.has_reconnected.load(Ordering::SeqCst)
    }

    /// Clears the sticky reconnect flag once the reconnect has been handled.
    pub fn clear_reconnected(&self) {
        self.shared.has_reconnected.store(false, Ordering::SeqCst);
    }

    /// Number of probes actually performed (skipped ones excluded).
    pub fn probe_count(&self) -> u64 {
        self.shared.probes.load(Ordering::Relaxed)
    }

    /// Snapshot of the connection state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState {
            is_online: self.shared.is_online(),
            is_checking: self.shared.checking.load(Ordering::SeqCst),
            last_checked_at: *self.shared.last_checked_at.lock(),
            has_reconnected: self.has_reconnected(),
        }
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("state", &self.state())
            .field("interval", &self.interval())
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_monitor(
    shared: Arc<MonitorShared>,
    signals: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ConnectivitySignal>>>,
) {
    // Held for the task's lifetime; released when a replaced task is aborted.
    let mut signals = signals.lock().await;

    loop {
        let period = *shared.interval.read();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !shared.paused.load(Ordering::SeqCst) {
                        shared.spawn_check();
                    }
                }
                signal = signals.recv() => match signal {
                    Some(signal) => shared.handle_signal(signal),
                    None => return,
                },
                _ = shared.interval_changed.notified() => break,
            }
        }
    }
}

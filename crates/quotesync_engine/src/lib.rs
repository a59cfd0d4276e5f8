//! # QuoteSync Engine
//!
//! Offline-aware synchronization and lifecycle engine for quotations.
//!
//! This crate provides:
//! - Connection monitoring with offline/online edge detection
//! - An in-process event bus with explicit subscription handles
//! - Field-level reconciliation between a cached copy and the server copy
//! - Conflict resolution (keep-local, keep-server, merge, defer)
//! - The quotation state machine and its cascading side effects
//! - A sync session tying reconnects to reconciliation
//! - HTTP collaborators for talking to a QuoteSync server
//!
//! ## Architecture
//!
//! The server copy is authoritative. On reconnect:
//! 1. Every tracked or stale record is reconciled
//! 2. Divergent records produce a `ConflictInfo`
//! 3. A decider picks a strategy and the resolver applies it
//! 4. The outcome is emitted on the event bus
//!
//! Lifecycle transitions go through `QuotationStateMachine` independently
//! and are audited.
//!
//! ## Key Invariants
//!
//! - At most one `ACTIVA` quotation per client
//! - `version` only increases; equal versions never conflict
//! - Only transitions in the table are ever applied
//! - Audit and notification failures never undo a transition

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bus;
mod collaborators;
mod config;
mod error;
mod http;
mod lifecycle;
mod memory;
mod monitor;
mod reconcile;
mod resolver;
mod session;

pub use bus::{EventFilter, Subscription, SyncEventBus};
pub use collaborators::{
    Actor, AuditEntry, AuditSink, Notifier, QuotationCache, QuotationStore, ReachabilityProbe,
};
pub use config::{MonitorConfig, SyncConfig, WatchedFields};
pub use error::{SyncError, SyncResult};
pub use http::{HttpProbe, HttpQuotationStore, ACTOR_ID_HEADER, ACTOR_NAME_HEADER};
pub use lifecycle::{
    ActiveSupersession, QuotationStateMachine, TransitionOutcome, MAX_WRITE_ATTEMPTS,
    STATE_CHANGE_ACTION, SUPERSEDED_ACTION,
};
pub use memory::{
    MemoryCache, MemoryQuotationStore, MockProbe, RecordingAuditSink, RecordingNotifier,
    SentNotification,
};
pub use monitor::{ConnectionEdge, ConnectionMonitor, ConnectionState, ConnectivitySignal, SignalSender};
pub use reconcile::ReconciliationEngine;
pub use resolver::{ConflictResolver, Resolution};
pub use session::{ConflictDecider, DeferDecider, FixedStrategy, SyncReport, SyncSession, SyncStats};

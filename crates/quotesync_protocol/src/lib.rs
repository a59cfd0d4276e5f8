//! # QuoteSync Protocol
//!
//! Data types shared by the QuoteSync engine and server.
//!
//! This crate provides:
//! - `Quotation` and `QuotationPatch` (the synchronized record)
//! - `QuotationState` and its transition table
//! - `ConflictInfo` and `ResolutionStrategy` for reconciliation
//! - `SyncEvent` for in-process change notification
//! - Field diffs used by reconciliation and audit
//! - Wire messages for the HTTP endpoints
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod diff;
mod event;
mod messages;
mod quotation;
mod state;

pub use conflict::{ConflictInfo, ParseStrategyError, ResolutionStrategy};
pub use diff::{merge_fields, record_changes, watched_differences, FieldChange};
pub use event::{SyncEvent, SyncEventKind, SyncEventPayload};
pub use messages::{
    ActiveConflictBody, CreateQuotationRequest, ErrorBody, InvalidTransitionBody,
    StaleWriteBody, StateChangeRequest,
};
pub use quotation::{Fields, Quotation, QuotationId, QuotationPatch};
pub use state::{ParseStateError, QuotationState};

//! Error types for the sync engine.

use quotesync_protocol::{QuotationId, QuotationState};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Variants carry messages rather than source errors so a result can be
/// shared between callers awaiting the same reconciliation pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (unexpected or malformed response).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The record does not exist on the server.
    #[error("quotation {0} not found")]
    NotFound(QuotationId),

    /// The persistence collaborator failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The audit collaborator failed.
    #[error("audit error: {0}")]
    Audit(String),

    /// The notification collaborator failed.
    #[error("notification error: {0}")]
    Notification(String),

    /// Transition not present in the lifecycle table.
    #[error("invalid transition from {from} to {to}; allowed: {}", format_states(.allowed))]
    InvalidTransition {
        /// Current state.
        from: QuotationState,
        /// Rejected target.
        to: QuotationState,
        /// Targets allowed from `from`.
        allowed: Vec<QuotationState>,
    },

    /// Activation without `force` while another quotation of the same client
    /// is active.
    #[error("quotation {existing} is already active for client {client}")]
    ActiveConflict {
        /// The quotation currently active.
        existing: QuotationId,
        /// Client identifier shared by both.
        client: String,
    },

    /// A guarded patch found the record at a different version.
    #[error("quotation {id} is at version {actual}, expected {expected}")]
    StaleWrite {
        /// The record the patch targeted.
        id: QuotationId,
        /// Version the patch expected.
        expected: u64,
        /// Version the store holds.
        actual: u64,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,
}

fn format_states(states: &[QuotationState]) -> String {
    let names: Vec<&str> = states.iter().map(QuotationState::as_str).collect();
    format!("[{}]", names.join(", "))
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates the rejection for a transition outside the table.
    pub fn invalid_transition(from: QuotationState, to: QuotationState) -> Self {
        Self::InvalidTransition {
            from,
            to,
            allowed: from.allowed_targets().to_vec(),
        }
    }

    /// Returns true if this error can be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else if err.is_decode() {
            SyncError::Protocol(err.to_string())
        } else if err.is_connect() || err.is_request() {
            SyncError::transport_retryable(err.to_string())
        } else {
            SyncError::transport_fatal(err.to_string())
        }
    }
}

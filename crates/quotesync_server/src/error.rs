//! Error types for the QuoteSync server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use quotesync_engine::SyncError;
use quotesync_protocol::{
    ActiveConflictBody, ErrorBody, InvalidTransitionBody, QuotationId, QuotationState,
    StaleWriteBody,
};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown quotation.
    #[error("quotation {0} not found")]
    NotFound(QuotationId),

    /// Transition outside the lifecycle table.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: QuotationState,
        /// Rejected target.
        to: QuotationState,
        /// Targets allowed from `from`.
        allowed: Vec<QuotationState>,
    },

    /// Un-forced activation while another quotation of the client is active.
    #[error("quotation {existing} is already active for client {client}")]
    ActiveConflict {
        /// The quotation currently active.
        existing: QuotationId,
        /// Client identifier.
        client: String,
    },

    /// A guarded patch found the record at another version.
    #[error("quotation {id} is at version {actual}, expected {expected}")]
    StaleWrite {
        /// The record the patch targeted.
        id: QuotationId,
        /// Version the patch expected.
        expected: u64,
        /// Version the store holds.
        actual: u64,
    },

    /// The store did not answer in time or is unreachable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::NotFound(_)
                | ServerError::InvalidTransition { .. }
                | ServerError::ActiveConflict { .. }
                | ServerError::StaleWrite { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Unavailable(_) | ServerError::Database(_) | ServerError::Internal(_)
        )
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) | ServerError::InvalidTransition { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::ActiveConflict { .. } | ServerError::StaleWrite { .. } => {
                StatusCode::CONFLICT
            }
            ServerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Database(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<SyncError> for ServerError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound(id) => ServerError::NotFound(id),
            SyncError::InvalidTransition { from, to, allowed } => {
                ServerError::InvalidTransition { from, to, allowed }
            }
            SyncError::ActiveConflict { existing, client } => {
                ServerError::ActiveConflict { existing, client }
            }
            SyncError::StaleWrite {
                id,
                expected,
                actual,
            } => ServerError::StaleWrite {
                id,
                expected,
                actual,
            },
            SyncError::Persistence(message) => ServerError::Database(message),
            SyncError::Timeout => ServerError::Unavailable(err.to_string()),
            SyncError::Transport { message, .. } => ServerError::Unavailable(message),
            SyncError::Protocol(_) | SyncError::Audit(_) | SyncError::Notification(_) => {
                ServerError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.to_string();
        if status.is_server_error() {
            tracing::error!(%status, %error, "request failed");
        } else {
            tracing::debug!(%status, %error, "request rejected");
        }
        match self {
            ServerError::InvalidTransition { from, to, allowed } => (
                status,
                Json(InvalidTransitionBody {
                    error,
                    from,
                    to,
                    allowed,
                }),
            )
                .into_response(),
            ServerError::ActiveConflict { existing, client } => (
                status,
                Json(ActiveConflictBody {
                    error,
                    existing,
                    client,
                }),
            )
                .into_response(),
            ServerError::StaleWrite {
                id,
                expected,
                actual,
            } => (
                status,
                Json(StaleWriteBody {
                    error,
                    id,
                    expected,
                    actual,
                }),
            )
                .into_response(),
            _ => (status, Json(ErrorBody { error })).into_response(),
        }
    }
}

//! Request and response bodies for the HTTP endpoints.

use crate::quotation::{Fields, QuotationId};
use crate::state::QuotationState;
use serde::{Deserialize, Serialize};

/// Body of `POST /quotations/{id}/state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeRequest {
    /// Target state.
    pub state: QuotationState,
    /// When entering `ACTIVA`, supersede any other active quotation of the
    /// same client instead of refusing.
    #[serde(default)]
    pub force: bool,
}

impl StateChangeRequest {
    /// Creates an un-forced request.
    pub fn new(state: QuotationState) -> Self {
        Self {
            state,
            force: false,
        }
    }

    /// Creates a forced request.
    pub fn forced(state: QuotationState) -> Self {
        Self { state, force: true }
    }
}

/// Body of `POST /quotations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuotationRequest {
    /// Optional caller-chosen identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<QuotationId>,
    /// Client identifier.
    pub client_email: String,
    /// Initial content fields.
    #[serde(default)]
    pub fields: Fields,
}

/// Generic error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
}

/// 400 body for a transition outside the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidTransitionBody {
    /// Human-readable message.
    pub error: String,
    /// State the record is in.
    pub from: QuotationState,
    /// Rejected target.
    pub to: QuotationState,
    /// Targets allowed from `from`, in table order.
    pub allowed: Vec<QuotationState>,
}

/// 409 body for an un-forced activation while another record is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveConflictBody {
    /// Human-readable message.
    pub error: String,
    /// The quotation currently active for the same client.
    pub existing: QuotationId,
    /// Client identifier shared by both.
    pub client: String,
}

/// 409 body for a patch whose version guard no longer matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleWriteBody {
    /// Human-readable message.
    pub error: String,
    /// The record the patch targeted.
    pub id: QuotationId,
    /// Version the patch expected.
    pub expected: u64,
    /// Version the store holds.
    pub actual: u64,
}

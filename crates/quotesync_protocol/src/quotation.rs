//! The synchronized quotation record.

use crate::state::QuotationState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Content fields of a quotation, keyed by field name.
pub type Fields = BTreeMap<String, Value>;

/// Unique identifier for a quotation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotationId(Uuid);

impl QuotationId {
    /// Creates a new random quotation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a quotation ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for QuotationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QuotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuotationId({})", self.0)
    }
}

impl fmt::Display for QuotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QuotationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for QuotationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A quotation as stored by the persistence collaborator.
///
/// `version` increases by one on every accepted write. The local cache holds
/// the last server copy it saw, possibly with local edits on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quotation {
    /// Record identifier.
    pub id: QuotationId,
    /// Monotonically increasing version.
    pub version: u64,
    /// Lifecycle state.
    pub state: QuotationState,
    /// Client identifier (contact email).
    pub client_email: String,
    /// Domain content fields.
    #[serde(default)]
    pub fields: Fields,
    /// Time of the last accepted write.
    pub updated_at: DateTime<Utc>,
}

impl Quotation {
    /// Creates a freshly loaded quotation (version 1, state `CARGADA`).
    pub fn new(id: QuotationId, client_email: impl Into<String>, fields: Fields) -> Self {
        Self {
            id,
            version: 1,
            state: QuotationState::initial(),
            client_email: client_email.into(),
            fields,
            updated_at: Utc::now(),
        }
    }

    /// Returns a content field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a content field, returning the previous value.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(name.into(), value)
    }

    /// Returns true if this quotation belongs to the given client.
    ///
    /// Client identifiers are emails and compare case-insensitively.
    pub fn belongs_to(&self, client_email: &str) -> bool {
        self.client_email.eq_ignore_ascii_case(client_email.trim())
    }

    /// Applies a patch, bumping the version and stamping `updated_at`.
    ///
    /// This is what an atomic persistence `update` does.
    pub fn apply_patch(&mut self, patch: &QuotationPatch, now: DateTime<Utc>) {
        if let Some(fields) = &patch.fields {
            self.fields = fields.clone();
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(client_email) = &patch.client_email {
            self.client_email = client_email.clone();
        }
        self.version += 1;
        self.updated_at = now;
    }
}

/// A partial update applied atomically by the persistence collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotationPatch {
    /// Replacement content fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Fields>,
    /// New lifecycle state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<QuotationState>,
    /// New client identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_email: Option<String>,
    /// Version the stored record must still have for the patch to apply.
    ///
    /// A store receiving a patch whose guard no longer matches leaves the
    /// record untouched and reports the version it found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

impl QuotationPatch {
    /// A patch replacing the content fields.
    pub fn fields(fields: Fields) -> Self {
        Self {
            fields: Some(fields),
            ..Self::default()
        }
    }

    /// A patch changing the lifecycle state.
    pub fn state(state: QuotationState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Guards the patch on the record still being at `version`.
    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Returns true if the patch changes nothing. The version guard is not a
    /// change.
    pub fn is_empty(&self) -> bool {
        self.fields.is_none() && self.state.is_none() && self.client_email.is_none()
    }
}

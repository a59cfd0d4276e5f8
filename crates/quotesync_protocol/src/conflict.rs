//! Conflict descriptors and resolution strategies.

use crate::quotation::{Quotation, QuotationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A divergence between the cached copy and the server copy of a record.
///
/// Only produced when versions differ AND at least one watched field differs.
/// Never persisted: it lives until it is resolved or deferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    /// Record the conflict is about.
    pub record_id: QuotationId,
    /// Version of the cached copy.
    pub local_version: u64,
    /// Version of the server copy.
    pub server_version: u64,
    /// `updated_at` of the cached copy.
    pub local_updated_at: DateTime<Utc>,
    /// `updated_at` of the server copy.
    pub server_updated_at: DateTime<Utc>,
    /// Watched fields whose values differ.
    pub conflicting_fields: Vec<String>,
    /// Cached copy at detection time.
    pub local: Quotation,
    /// Server copy at detection time.
    pub server: Quotation,
}

impl ConflictInfo {
    /// Builds a conflict from the two copies and the differing fields.
    pub fn new(local: Quotation, server: Quotation, conflicting_fields: Vec<String>) -> Self {
        Self {
            record_id: server.id,
            local_version: local.version,
            server_version: server.version,
            local_updated_at: local.updated_at,
            server_updated_at: server.updated_at,
            conflicting_fields,
            local,
            server,
        }
    }

    /// Returns true if the server copy was written after the cached copy.
    pub fn server_is_newer(&self) -> bool {
        self.server_updated_at > self.local_updated_at
    }
}

/// How a detected conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Push the cached copy to the server as a new version.
    KeepLocal,
    /// Discard local changes and adopt the server copy.
    KeepServer,
    /// Shallow per-field merge where the server wins shared keys.
    Merge,
    /// Leave the conflict for the next reconciliation pass.
    #[serde(alias = "cancel")]
    Defer,
}

impl ResolutionStrategy {
    /// All strategies.
    pub const ALL: [ResolutionStrategy; 4] = [
        ResolutionStrategy::KeepLocal,
        ResolutionStrategy::KeepServer,
        ResolutionStrategy::Merge,
        ResolutionStrategy::Defer,
    ];

    /// The wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::KeepLocal => "keep-local",
            ResolutionStrategy::KeepServer => "keep-server",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Defer => "defer",
        }
    }

    /// Label suitable for showing to users.
    ///
    /// Merge is shallow and server-wins per field, so it is presented as a
    /// best-effort merge.
    pub const fn label(&self) -> &'static str {
        match self {
            ResolutionStrategy::KeepLocal => "keep my changes",
            ResolutionStrategy::KeepServer => "use server version",
            ResolutionStrategy::Merge => "best-effort merge",
            ResolutionStrategy::Defer => "decide later",
        }
    }

    /// Returns true if this strategy writes to the cache or the server.
    pub fn settles(&self) -> bool {
        !matches!(self, ResolutionStrategy::Defer)
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resolution strategy: {0}")]
pub struct ParseStrategyError(pub String);

impl FromStr for ResolutionStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep-local" => Ok(ResolutionStrategy::KeepLocal),
            "keep-server" => Ok(ResolutionStrategy::KeepServer),
            "merge" => Ok(ResolutionStrategy::Merge),
            "defer" | "cancel" => Ok(ResolutionStrategy::Defer),
            _ => Err(ParseStrategyError(s.to_string())),
        }
    }
}

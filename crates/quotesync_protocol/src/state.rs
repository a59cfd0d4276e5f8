//! Quotation lifecycle states and the transition table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle state of a quotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotationState {
    /// Loaded, not yet offered. Initial state.
    Cargada,
    /// The live offer for its client.
    Activa,
    /// Parked; not the live offer.
    Inactiva,
    /// Accepted by the client.
    Aceptada,
    /// Rejected by the client.
    Rechazada,
    /// Reworked into a new proposal.
    NuevaPropuesta,
    /// Validity period elapsed.
    Expirada,
}

impl QuotationState {
    /// All states, in declaration order.
    pub const ALL: [QuotationState; 7] = [
        QuotationState::Cargada,
        QuotationState::Activa,
        QuotationState::Inactiva,
        QuotationState::Aceptada,
        QuotationState::Rechazada,
        QuotationState::NuevaPropuesta,
        QuotationState::Expirada,
    ];

    /// The state every new quotation starts in.
    pub const fn initial() -> Self {
        QuotationState::Cargada
    }

    /// Targets reachable from this state, in table order.
    pub const fn allowed_targets(&self) -> &'static [QuotationState] {
        use QuotationState::*;
        match self {
            Cargada => &[Activa, Inactiva],
            Activa => &[Cargada, Inactiva, Expirada],
            Inactiva => &[Cargada, Activa],
            Aceptada => &[Cargada, NuevaPropuesta],
            Rechazada => &[Cargada, NuevaPropuesta],
            NuevaPropuesta => &[Activa, Cargada],
            Expirada => &[Cargada, Activa],
        }
    }

    /// Returns true if `target` is in this state's allowed set.
    pub fn can_transition_to(&self, target: QuotationState) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Returns true if entering this state notifies every staff user.
    pub fn notifies_staff(&self) -> bool {
        matches!(
            self,
            QuotationState::Aceptada | QuotationState::Rechazada | QuotationState::Expirada
        )
    }

    /// The literal wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            QuotationState::Cargada => "CARGADA",
            QuotationState::Activa => "ACTIVA",
            QuotationState::Inactiva => "INACTIVA",
            QuotationState::Aceptada => "ACEPTADA",
            QuotationState::Rechazada => "RECHAZADA",
            QuotationState::NuevaPropuesta => "NUEVA_PROPUESTA",
            QuotationState::Expirada => "EXPIRADA",
        }
    }
}

impl fmt::Display for QuotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown state name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown quotation state: {0}")]
pub struct ParseStateError(pub String);

impl FromStr for QuotationState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        QuotationState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}

//! Transfer lifecycle states and the transition table.
//!
//! The table below is the only place that decides whether a state change is
//! legal. Side effects live in the aggregate; legality lives here.

use serde::{Deserialize, Serialize};

use depot_core::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Draft,
    PendingApproval,
    Approved,
    InTransit,
    PartiallyReceived,
    Received,
    Cancelled,
}

use self::TransferState::*;

/// Source state → allowed targets.
const TRANSITIONS: &[(TransferState, &[TransferState])] = &[
    (Draft, &[PendingApproval, Cancelled]),
    (PendingApproval, &[Approved, Draft, Cancelled]),
    (Approved, &[InTransit, Cancelled]),
    (InTransit, &[PartiallyReceived, Received, Cancelled]),
    (PartiallyReceived, &[Received, Cancelled]),
    (Received, &[]),
    (Cancelled, &[]),
];

impl TransferState {
    pub const ALL: [TransferState; 7] = [
        Draft,
        PendingApproval,
        Approved,
        InTransit,
        PartiallyReceived,
        Received,
        Cancelled,
    ];

    pub fn allowed_targets(self) -> &'static [TransferState] {
        TRANSITIONS
            .iter()
            .find(|(from, _)| *from == self)
            .map(|(_, targets)| *targets)
            .unwrap_or(&[])
    }

    pub fn can_transition_to(self, target: TransferState) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Whether stock has already left the origin warehouse in this state.
    pub fn has_shipped(self) -> bool {
        matches!(self, InTransit | PartiallyReceived | Received)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Draft => "draft",
            PendingApproval => "pending_approval",
            Approved => "approved",
            InTransit => "in_transit",
            PartiallyReceived => "partially_received",
            Received => "received",
            Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for TransferState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransferState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransferState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown transfer state '{s}'")))
    }
}

//! Remote run lifecycle
//!
//! ```text
//! queued ─► in_progress ─► completed
//!   │           │    └───► failed | expired | incomplete | requires_action
//!   │           └────────► cancelling ─► cancelled
//!   └────────────────────► (any terminal)
//! ```

use serde::{Deserialize, Serialize};

/// Observed state of a remote inference run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    /// Cancellation requested on the remote side
    Cancelling,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Incomplete,
    RequiresAction,
}

impl RunStatus {
    /// Parse the provider's status string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "in_progress" => Some(Self::InProgress),
            "cancelling" => Some(Self::Cancelling),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            "incomplete" => Some(Self::Incomplete),
            "requires_action" => Some(Self::RequiresAction),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Incomplete => "incomplete",
            Self::RequiresAction => "requires_action",
        }
    }

    /// Terminal states are never left again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::InProgress | Self::Cancelling)
    }

    /// Terminal outcomes other than success
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && *self != Self::Completed
    }

    /// Failures a fresh run may not repeat
    pub fn is_transient_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Expired | Self::Incomplete)
    }

    /// Whether a poll may observe `next` after `self`
    ///
    /// Re-observing a transient state is legal; leaving a terminal state or
    /// moving backwards towards `queued` is not.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;

        match (*self, next) {
            (from, _) if from.is_terminal() => false,
            (Queued, _) => true,
            (InProgress, Queued) => false,
            (InProgress, _) => true,
            (Cancelling, Cancelling | Cancelled | Completed | Failed | Expired) => true,
            (Cancelling, _) => false,
            _ => false,
        }
    }

    /// User-facing reason for a failed outcome
    pub fn failure_reason(&self) -> &'static str {
        match self {
            Self::Failed => "the assistant run failed",
            Self::Cancelled => "the assistant run was cancelled by the provider",
            Self::Expired => "the assistant run expired before finishing",
            Self::Incomplete => "the assistant run ended before producing a full answer",
            Self::RequiresAction => "the assistant requested a tool action this client cannot perform",
            Self::Queued | Self::InProgress | Self::Cancelling | Self::Completed => "",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

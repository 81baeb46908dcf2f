//! Kernel lifecycle states.

use serde::{Deserialize, Serialize};

/// State of the execution context.
///
/// Transitions only move forward:
/// `Starting → Running → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl CoreState {
    /// Whether moving from `self` to `next` is a valid transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        next > self
    }

    /// Every state, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Starting, Self::Running, Self::Stopping, Self::Stopped];
}

impl std::fmt::Display for CoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Stopping => f.write_str("stopping"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

//! Supervisor lifecycle state.

use serde::{Deserialize, Serialize};

/// Where the supervisor is in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SupervisorState {
    Initializing,
    Running,
    Draining,
    Terminated,
}

impl SupervisorState {
    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Initializing, Running)
                | (Initializing, Terminated)
                | (Running, Draining)
                | (Running, Terminated)
                | (Draining, Terminated)
        )
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorState::Initializing => write!(f, "initializing"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Draining => write!(f, "draining"),
            SupervisorState::Terminated => write!(f, "terminated"),
        }
    }
}

//! Acquisition run lifecycle.

use serde::{Deserialize, Serialize};

/// Acquisition run state.
///
/// # State Machine
///
/// ```text
/// Idle ──start──> Running ──last step──> Completed
///                    │
///                    ├──stop requested──> Cancelled
///                    │
///                    └──move/capture fault──> Failed
/// ```
///
/// The three terminal states are mutually exclusive and irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Nothing started yet
    Idle,
    /// Steps are being executed
    Running,
    /// Every step was captured
    Completed,
    /// Stopped at a step boundary on request
    Cancelled,
    /// Aborted by a stage, spectrometer or storage fault
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Running => write!(f, "Running"),
            RunState::Completed => write!(f, "Completed"),
            RunState::Cancelled => write!(f, "Cancelled"),
            RunState::Failed => write!(f, "Failed"),
        }
    }
}

impl RunState {
    /// True for `Completed`, `Cancelled` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }

    /// Check whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        match self {
            RunState::Idle => next == RunState::Running,
            RunState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

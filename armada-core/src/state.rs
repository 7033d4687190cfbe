use crate::primitives::ResultId;
use serde::{Deserialize, Serialize};

/// State of a remote result as reported by the backend.
///
/// The only legal transitions leave `Pending`. `Completed` and `Failed` are
/// terminal. `Delegated` is final for the record that holds it, but resolving it
/// means resolving the child it points to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleState {
    /// Submitted, not finished yet.
    Pending,
    /// The producing task handed its result over to another result.
    Delegated(ResultId),
    /// The value is available as the blob stored under the same identifier.
    Completed,
    /// The producing task failed with this error.
    Failed(String),
}

impl HandleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandleState::Completed | HandleState::Failed(_))
    }

    /// Whether moving from `self` to `next` respects the one-way state machine.
    pub fn can_transition_to(&self, next: &HandleState) -> bool {
        matches!(self, HandleState::Pending) && !matches!(next, HandleState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_only_leave_pending() {
        let child = HandleState::Delegated(ResultId::new("child"));
        assert!(HandleState::Pending.can_transition_to(&HandleState::Completed));
        assert!(HandleState::Pending.can_transition_to(&child));
        assert!(HandleState::Pending.can_transition_to(&HandleState::Failed("x".into())));
        assert!(!HandleState::Pending.can_transition_to(&HandleState::Pending));
        assert!(!HandleState::Completed.can_transition_to(&HandleState::Failed("x".into())));
        assert!(!child.can_transition_to(&HandleState::Completed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(HandleState::Completed.is_terminal());
        assert!(HandleState::Failed("boom".into()).is_terminal());
        assert!(!HandleState::Pending.is_terminal());
        assert!(!HandleState::Delegated(ResultId::new("c")).is_terminal());
    }
}

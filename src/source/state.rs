//! Source lifecycle and readiness state

use std::time::Instant;

/// Supervisor state machine
///
/// `Connecting → Streaming → CoolingDown → Connecting → …` until the source
/// is stopped. Transitions are validated so a stopped source stays stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Created, supervisor task not yet running
    Idle,

    /// Dialing the remote endpoint
    Connecting,

    /// Session established and frames are being relayed
    Streaming {
        /// When the session became ready
        since: Instant,
    },

    /// Waiting out the retry pause after a failure
    CoolingDown,

    /// Supervisor has exited, terminal
    Stopped,
}

impl SourceState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SourceState) -> bool {
        use SourceState::*;

        match (self, target) {
            (Idle, Connecting) => true,
            (Idle, Stopped) => true,

            (Connecting, Streaming { .. }) => true,
            (Connecting, CoolingDown) => true,
            (Connecting, Stopped) => true,

            (Streaming { .. }, CoolingDown) => true,
            (Streaming { .. }, Stopped) => true,

            (CoolingDown, Connecting) => true,
            (CoolingDown, Stopped) => true,

            (Stopped, _) => false,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SourceState::Idle => "Idle",
            SourceState::Connecting => "Connecting",
            SourceState::Streaming { .. } => "Streaming",
            SourceState::CoolingDown => "CoolingDown",
            SourceState::Stopped => "Stopped",
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, SourceState::Streaming { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, SourceState::Stopped)
    }

    /// Time spent in the current session (if streaming)
    pub fn streaming_duration(&self) -> Option<std::time::Duration> {
        if let SourceState::Streaming { since } = self {
            Some(since.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Availability of the source as seen by the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    #[default]
    NotReady,
    Ready,
}

/// Guards the ready / not-ready alternation.
///
/// A transition only succeeds from the opposite state, so the caller emits
/// a notification exactly when `mark_*` returns `true`.
#[derive(Debug, Default)]
pub struct ReadinessTracker {
    state: Readiness,
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Readiness {
        self.state
    }

    pub fn mark_ready(&mut self) -> bool {
        self.transition(Readiness::Ready)
    }

    pub fn mark_not_ready(&mut self) -> bool {
        self.transition(Readiness::NotReady)
    }

    fn transition(&mut self, target: Readiness) -> bool {
        if self.state == target {
            return false;
        }
        self.state = target;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let streaming = SourceState::Streaming {
            since: Instant::now(),
        };

        assert!(SourceState::Idle.can_transition_to(&SourceState::Connecting));
        assert!(SourceState::Connecting.can_transition_to(&streaming));
        assert!(SourceState::Connecting.can_transition_to(&SourceState::CoolingDown));
        assert!(streaming.can_transition_to(&SourceState::CoolingDown));
        assert!(SourceState::CoolingDown.can_transition_to(&SourceState::Connecting));

        // every live state can be stopped
        for state in [SourceState::Idle, SourceState::Connecting, streaming, SourceState::CoolingDown] {
            assert!(state.can_transition_to(&SourceState::Stopped));
        }
    }

    #[test]
    fn test_invalid_transitions() {
        let streaming = SourceState::Streaming {
            since: Instant::now(),
        };

        assert!(!SourceState::Idle.can_transition_to(&streaming));
        assert!(!SourceState::CoolingDown.can_transition_to(&streaming));
        assert!(!streaming.can_transition_to(&SourceState::Connecting));
        assert!(!SourceState::Stopped.can_transition_to(&SourceState::Connecting));
        assert!(!SourceState::Stopped.can_transition_to(&SourceState::Stopped));
    }

    #[test]
    fn test_readiness_alternates() {
        let mut tracker = ReadinessTracker::new();
        assert_eq!(tracker.state(), Readiness::NotReady);

        assert!(!tracker.mark_not_ready());
        assert!(tracker.mark_ready());
        assert!(!tracker.mark_ready());
        assert_eq!(tracker.state(), Readiness::Ready);
        assert!(tracker.mark_not_ready());
        assert!(!tracker.mark_not_ready());
    }
}

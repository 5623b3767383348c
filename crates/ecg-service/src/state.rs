//! Pipeline lifecycle state

use ecg_core::SessionId;
use std::fmt;

/// Pipeline state machine
///
/// `Starting → Running → Reconnecting → Running … → Stopped | Fatal`.
/// Published on a `watch` channel so callers can observe transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    /// Opening the device for the first time
    Starting,

    /// Processing samples of one session
    Running {
        /// Session being processed
        session: SessionId,
    },

    /// Transport lost, reopening with backoff
    Reconnecting,

    /// Stopped on request
    Stopped,

    /// Terminated by an unrecoverable error
    Fatal {
        /// What ended the pipeline
        reason: String,
    },
}

impl PipelineState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            (Starting, Running { .. }) => true,
            (Starting, Reconnecting) => true,

            (Running { .. }, Reconnecting) => true,

            (Reconnecting, Running { .. }) => true,

            // Stop and failure are reachable from any live state
            (Starting | Running { .. } | Reconnecting, Stopped | Fatal { .. }) => true,

            // Terminal states
            (Stopped | Fatal { .. }, _) => false,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Fatal { .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PipelineState::Running { .. })
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Starting => "Starting",
            PipelineState::Running { .. } => "Running",
            PipelineState::Reconnecting => "Reconnecting",
            PipelineState::Stopped => "Stopped",
            PipelineState::Fatal { .. } => "Fatal",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let running = PipelineState::Running {
            session: SessionId::new(),
        };
        assert!(PipelineState::Starting.can_transition_to(&running));
        assert!(running.can_transition_to(&PipelineState::Reconnecting));
        assert!(PipelineState::Reconnecting.can_transition_to(&running));
        assert!(running.can_transition_to(&PipelineState::Stopped));
        assert!(PipelineState::Reconnecting.can_transition_to(&PipelineState::Fatal {
            reason: "gave up".to_string()
        }));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let fatal = PipelineState::Fatal {
            reason: "gave up".to_string(),
        };
        assert!(fatal.is_terminal());
        assert!(PipelineState::Stopped.is_terminal());
        assert!(!PipelineState::Stopped.can_transition_to(&PipelineState::Starting));
        assert!(!fatal.can_transition_to(&PipelineState::Reconnecting));
        assert!(!PipelineState::Starting.can_transition_to(&PipelineState::Starting));
    }

    #[test]
    fn test_description() {
        assert_eq!(PipelineState::Reconnecting.to_string(), "Reconnecting");
        assert!(!PipelineState::Starting.is_running());
    }
}

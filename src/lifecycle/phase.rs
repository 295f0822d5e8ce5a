//! Reconcile phases for a single `ensure` call.

use serde::Serialize;

use crate::pods::PodRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    Discovering,
    AlreadyRunning,
    Starting,
    Started,
    /// Start or create hit capacity exhaustion.
    RecreateNeeded,
    Deleting,
    Creating,
    Created,
    /// Verify-only: stopping a pod that was just proven startable.
    Verifying,
    Success,
    Failed,
}

impl ReconcilePhase {
    pub fn can_transition_to(&self, target: ReconcilePhase) -> bool {
        use ReconcilePhase::*;

        matches!(
            (self, target),
            (Discovering, AlreadyRunning) | (Discovering, Starting) | (Discovering, Creating) |
            (Starting, Started) | (Starting, RecreateNeeded) |
            // Create itself can hit capacity with nothing to delete
            (RecreateNeeded, Deleting) | (RecreateNeeded, Creating) | (RecreateNeeded, Failed) |
            (Deleting, Creating) | (Deleting, Failed) |
            (Creating, Created) | (Creating, RecreateNeeded) |
            (Created, Starting) | (Created, Verifying) | (Created, Success) |
            (AlreadyRunning, Verifying) | (AlreadyRunning, Success) |
            (Started, Verifying) | (Started, Success) |
            (Verifying, Success)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovering => "discovering",
            Self::AlreadyRunning => "already_running",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::RecreateNeeded => "recreate_needed",
            Self::Deleting => "deleting",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Verifying => "verifying",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Current phase of one reconcile, logged on every move.
pub(super) struct PhaseTracker {
    role: PodRole,
    phase: ReconcilePhase,
}

impl PhaseTracker {
    pub(super) fn new(role: PodRole) -> Self {
        Self {
            role,
            phase: ReconcilePhase::Discovering,
        }
    }

    pub(super) fn advance(&mut self, next: ReconcilePhase) {
        if !self.phase.can_transition_to(next) {
            tracing::warn!(
                "{} reconcile: unexpected transition {} -> {}",
                self.role,
                self.phase,
                next
            );
            debug_assert!(false, "invalid reconcile transition {} -> {}", self.phase, next);
        }
        tracing::debug!("{} reconcile: {} -> {}", self.role, self.phase, next);
        self.phase = next;
    }

    #[cfg(test)]
    pub(super) fn phase(&self) -> ReconcilePhase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recreate_path_is_valid() {
        let mut tracker = PhaseTracker::new(PodRole::Generation);
        for next in [
            ReconcilePhase::Starting,
            ReconcilePhase::RecreateNeeded,
            ReconcilePhase::Deleting,
            ReconcilePhase::Creating,
            ReconcilePhase::Created,
            ReconcilePhase::Starting,
            ReconcilePhase::Started,
            ReconcilePhase::Success,
        ] {
            tracker.advance(next);
        }
        assert_eq!(tracker.phase(), ReconcilePhase::Success);
        assert!(tracker.phase().is_terminal());
    }

    #[test]
    fn create_capacity_failure_retries_create() {
        use ReconcilePhase::*;
        assert!(Creating.can_transition_to(RecreateNeeded));
        assert!(RecreateNeeded.can_transition_to(Creating));
        assert!(RecreateNeeded.can_transition_to(Failed));
    }

    #[test]
    fn invalid_transitions() {
        use ReconcilePhase::*;
        assert!(!Success.can_transition_to(Starting));
        assert!(!Discovering.can_transition_to(Deleting));
        assert!(!Started.can_transition_to(RecreateNeeded));
        assert!(!Failed.can_transition_to(Discovering));
    }
}

//! Run status state machine.
//!
//! `reduce` is pure: commands issued locally and events reported by the
//! backend are both expressed as a [`StatusInput`], so optimistic and
//! authoritative transitions go through the same edge table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl RunStatus {
    /// Whether `self -> next` is one of the machine's edges.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Running)
                | (Self::Starting, Self::Stopped)
                | (Self::Running, Self::Stopping)
                | (Self::Running, Self::Stopped)
                | (Self::Stopping, Self::Stopped)
                | (Self::Stopping, Self::Running)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusInput {
    /// Start command issued locally.
    StartRequested,
    /// Stop command issued locally.
    StopRequested,
    /// The start request failed or was refused.
    StartFailed,
    /// The stop request failed or was refused.
    StopFailed,
    /// Status reported by the backend (status event or process exit).
    Observed(RunStatus),
    /// Result of the one-time status query made when a session mounts.
    Seed(RunStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RunStatus,
    pub to: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusOutcome {
    pub status: RunStatus,
    /// Edges taken, in order. Empty when the input was a no-op or rejected.
    pub transitions: Vec<Transition>,
    /// The input asked for an edge the machine does not have.
    pub rejected: bool,
}

impl StatusOutcome {
    pub fn unchanged(status: RunStatus) -> Self {
        Self {
            status,
            transitions: Vec::new(),
            rejected: false,
        }
    }

    fn rejected(status: RunStatus) -> Self {
        Self {
            status,
            transitions: Vec::new(),
            rejected: true,
        }
    }

    fn along(from: RunStatus, path: &[RunStatus]) -> Self {
        let mut transitions = Vec::with_capacity(path.len());
        let mut current = from;
        for &next in path {
            transitions.push(Transition {
                from: current,
                to: next,
            });
            current = next;
        }
        Self {
            status: current,
            transitions,
            rejected: false,
        }
    }

    pub fn changed(&self) -> bool {
        !self.transitions.is_empty()
    }

    pub fn entered(&self, status: RunStatus) -> bool {
        self.transitions.iter().any(|t| t.to == status)
    }

    pub fn left(&self, status: RunStatus) -> bool {
        self.transitions.iter().any(|t| t.from == status)
    }
}

pub fn reduce(current: RunStatus, input: StatusInput) -> StatusOutcome {
    use RunStatus::{Running, Starting, Stopped, Stopping};

    match input {
        StatusInput::StartRequested => match current {
            Stopped => StatusOutcome::along(current, &[Starting]),
            _ => StatusOutcome::rejected(current),
        },
        StatusInput::StopRequested => match current {
            Running => StatusOutcome::along(current, &[Stopping]),
            _ => StatusOutcome::rejected(current),
        },
        StatusInput::StartFailed => match current {
            Starting => StatusOutcome::along(current, &[Stopped]),
            _ => StatusOutcome::unchanged(current),
        },
        StatusInput::StopFailed => match current {
            Stopping => StatusOutcome::along(current, &[Running]),
            _ => StatusOutcome::unchanged(current),
        },
        StatusInput::Observed(target) | StatusInput::Seed(target) => observe(current, target),
    }
}

fn observe(current: RunStatus, target: RunStatus) -> StatusOutcome {
    use RunStatus::{Running, Starting, Stopped, Stopping};

    if current == target {
        return StatusOutcome::unchanged(current);
    }
    if target == Stopped {
        return StatusOutcome::along(current, &[Stopped]);
    }
    if current == Stopped && target == Running {
        // The starting event was never seen; walk through it.
        return StatusOutcome::along(current, &[Starting, Running]);
    }
    // stopping -> running is only a rollback of a failed stop request.
    if current == Stopping && target == Running {
        return StatusOutcome::rejected(current);
    }
    if current.can_transition_to(target) {
        return StatusOutcome::along(current, &[target]);
    }
    StatusOutcome::rejected(current)
}

#[cfg(test)]
mod tests {
    use super::RunStatus::{Running, Starting, Stopped, Stopping};
    use super::*;

    fn run(inputs: &[StatusInput]) -> (RunStatus, Vec<Transition>) {
        let mut status = Stopped;
        let mut all = Vec::new();
        for &input in inputs {
            let outcome = reduce(status, input);
            all.extend(outcome.transitions);
            status = outcome.status;
        }
        (status, all)
    }

    #[test]
    fn full_lifecycle_follows_edges() {
        let (status, transitions) = run(&[
            StatusInput::StartRequested,
            StatusInput::Observed(Starting),
            StatusInput::Observed(Running),
            StatusInput::StopRequested,
            StatusInput::Observed(Stopping),
            StatusInput::Observed(Stopped),
        ]);

        assert_eq!(status, Stopped);
        let path: Vec<RunStatus> = transitions.iter().map(|t| t.to).collect();
        assert_eq!(path, vec![Starting, Running, Stopping, Stopped]);
        assert!(transitions.iter().all(|t| t.from.can_transition_to(t.to)));
    }

    #[test]
    fn duplicate_events_are_noops() {
        let outcome = reduce(Running, StatusInput::Observed(Running));
        assert!(!outcome.changed());
        assert!(!outcome.rejected);
    }

    #[test]
    fn stopped_event_wins_from_any_state() {
        for from in [Starting, Running, Stopping] {
            let outcome = reduce(from, StatusInput::Observed(Stopped));
            assert_eq!(outcome.status, Stopped);
            assert_eq!(outcome.transitions, vec![Transition { from, to: Stopped }]);
        }
    }

    #[test]
    fn running_while_stopped_walks_through_starting() {
        let outcome = reduce(Stopped, StatusInput::Observed(Running));
        assert_eq!(outcome.status, Running);
        assert_eq!(outcome.transitions.len(), 2);
        assert!(outcome.entered(Starting));
        assert!(outcome.left(Stopped));
    }

    #[test]
    fn stale_edges_are_rejected() {
        assert!(reduce(Stopping, StatusInput::Observed(Running)).rejected);
        assert!(reduce(Running, StatusInput::Observed(Starting)).rejected);
        assert!(reduce(Stopped, StatusInput::Observed(Stopping)).rejected);
        assert_eq!(reduce(Stopping, StatusInput::Observed(Starting)).status, Stopping);
    }

    #[test]
    fn commands_require_the_matching_state() {
        assert!(reduce(Running, StatusInput::StartRequested).rejected);
        assert!(reduce(Starting, StatusInput::StopRequested).rejected);
        assert_eq!(reduce(Stopped, StatusInput::StartRequested).status, Starting);
        assert_eq!(reduce(Running, StatusInput::StopRequested).status, Stopping);
    }

    #[test]
    fn failures_roll_back_only_their_own_optimism() {
        assert_eq!(reduce(Starting, StatusInput::StartFailed).status, Stopped);
        // The backend already confirmed running; a late failure does not undo it.
        assert!(!reduce(Running, StatusInput::StartFailed).changed());
        assert_eq!(reduce(Stopping, StatusInput::StopFailed).status, Running);
        assert!(!reduce(Stopped, StatusInput::StopFailed).changed());
    }
}

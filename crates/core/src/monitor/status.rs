use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Externally observed status of one action instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Invoked,
    Running,
    Completed,
    Failed,
    Skipped,
    TimedOut,
    NotInvoked,
}

impl ActionStatus {
    /// A log artifact exists for this action
    pub fn has_log(&self) -> bool {
        matches!(
            self,
            ActionStatus::Running | ActionStatus::Completed | ActionStatus::Failed
        )
    }

    /// No further transition is expected
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ActionStatus::Completed
                | ActionStatus::Failed
                | ActionStatus::Skipped
                | ActionStatus::TimedOut
                | ActionStatus::NotInvoked
        )
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Invoked => "invoked",
            ActionStatus::Running => "running",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Skipped => "skipped",
            ActionStatus::TimedOut => "timed_out",
            ActionStatus::NotInvoked => "not_invoked",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct BoardState {
    statuses: BTreeMap<String, ActionStatus>,
    monitoring_complete: bool,
}

/// The status map, guarded by one coarse lock.
///
/// The lock is only held for the duration of a read or an update, never
/// across a storage call.
#[derive(Debug, Default)]
pub struct StatusBoard {
    state: Mutex<BoardState>,
}

impl StatusBoard {
    pub fn new(initial: BTreeMap<String, ActionStatus>) -> Self {
        Self {
            state: Mutex::new(BoardState {
                statuses: initial,
                monitoring_complete: false,
            }),
        }
    }

    /// Consistent copy of every status
    pub fn snapshot(&self) -> BTreeMap<String, ActionStatus> {
        self.state.lock().unwrap().statuses.clone()
    }

    pub fn get(&self, instance: &str) -> Option<ActionStatus> {
        self.state.lock().unwrap().statuses.get(instance).copied()
    }

    /// Move `instance` from `from` to `to`; false if it is no longer in `from`
    pub fn transition(&self, instance: &str, from: ActionStatus, to: ActionStatus) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.statuses.get_mut(instance) {
            Some(current) if *current == from => {
                *current = to;
                true
            }
            _ => false,
        }
    }

    /// Skip every still-pending action, returning the ones changed
    pub fn skip_pending(&self) -> Vec<String> {
        let mut state = self.state.lock().unwrap();
        state
            .statuses
            .iter_mut()
            .filter(|(_, status)| **status == ActionStatus::Pending)
            .map(|(name, status)| {
                *status = ActionStatus::Skipped;
                name.clone()
            })
            .collect()
    }

    /// Close out pending and running actions when monitoring stops early
    pub fn finalize(&self, shutdown_requested: bool) -> Vec<(String, ActionStatus)> {
        let target = if shutdown_requested {
            ActionStatus::Skipped
        } else {
            ActionStatus::TimedOut
        };

        let mut state = self.state.lock().unwrap();
        state
            .statuses
            .iter_mut()
            .filter(|(_, status)| {
                matches!(**status, ActionStatus::Pending | ActionStatus::Running)
            })
            .map(|(name, status)| {
                *status = target;
                (name.clone(), target)
            })
            .collect()
    }

    pub fn all_match(&self, predicate: impl Fn(ActionStatus) -> bool) -> bool {
        self.state
            .lock()
            .unwrap()
            .statuses
            .values()
            .all(|status| predicate(*status))
    }

    pub fn mark_complete(&self) {
        self.state.lock().unwrap().monitoring_complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().unwrap().monitoring_complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> StatusBoard {
        StatusBoard::new(
            [
                ("a".to_string(), ActionStatus::Running),
                ("b".to_string(), ActionStatus::Pending),
                ("c".to_string(), ActionStatus::Invoked),
                ("d".to_string(), ActionStatus::Pending),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn test_transition_requires_expected_status() {
        let board = board();

        assert!(board.transition("a", ActionStatus::Running, ActionStatus::Completed));
        assert!(!board.transition("a", ActionStatus::Running, ActionStatus::Failed));
        assert!(!board.transition("missing", ActionStatus::Pending, ActionStatus::Invoked));
        assert_eq!(board.get("a"), Some(ActionStatus::Completed));
    }

    #[test]
    fn test_skip_pending_only_touches_pending() {
        let board = board();

        let skipped = board.skip_pending();
        assert_eq!(skipped, vec!["b", "d"]);

        let snapshot = board.snapshot();
        assert_eq!(snapshot["a"], ActionStatus::Running);
        assert_eq!(snapshot["c"], ActionStatus::Invoked);
        assert_eq!(snapshot["d"], ActionStatus::Skipped);
    }

    #[test]
    fn test_finalize_on_timeout() {
        let board = board();

        let changed = board.finalize(false);
        assert_eq!(changed.len(), 3);
        assert!(changed.iter().all(|(_, s)| *s == ActionStatus::TimedOut));
        assert_eq!(board.get("c"), Some(ActionStatus::Invoked));
    }

    #[test]
    fn test_finalize_on_shutdown() {
        let board = board();

        board.finalize(true);
        assert_eq!(board.get("a"), Some(ActionStatus::Skipped));
        assert_eq!(board.get("b"), Some(ActionStatus::Skipped));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let board = board();
        let before = board.snapshot();

        board.transition("b", ActionStatus::Pending, ActionStatus::Invoked);

        assert_eq!(before["b"], ActionStatus::Pending);
        assert_eq!(board.get("b"), Some(ActionStatus::Invoked));
    }

    #[test]
    fn test_status_flags() {
        assert!(!ActionStatus::Pending.has_log());
        assert!(ActionStatus::Failed.has_log());
        assert!(ActionStatus::NotInvoked.is_final());
        assert!(!ActionStatus::Invoked.is_final());
        assert!(!ActionStatus::Running.is_final());
        assert_eq!(ActionStatus::TimedOut.to_string(), "timed_out");
    }
}

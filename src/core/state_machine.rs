use crate::models::{RunState, WorkOrderStatus};
use crate::CoreError;

/// Validates and applies transitions between [`WorkOrderStatus`] values.
/// Every state change in the system goes through here so illegal jumps
/// (e.g. `Succeeded -> Running`) are rejected in one place rather than
/// scattered across callers.
#[derive(Debug, Clone, Copy)]
pub struct StateMachine {
    current: WorkOrderStatus,
}

impl StateMachine {
    pub fn new(initial: WorkOrderStatus) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> WorkOrderStatus {
        self.current
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Returns true if moving from `from` to `to` is a legal transition.
    pub fn can_transition(from: WorkOrderStatus, to: WorkOrderStatus) -> bool {
        use WorkOrderStatus::*;
        matches!(
            (from, to),
            (Queued, Running)
                | (Queued, Canceled)
                | (Running, WaitingForChildren)
                | (Running, Integrating)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Canceled)
                | (WaitingForChildren, Running)
                | (WaitingForChildren, Canceled)
                | (Integrating, Succeeded)
                | (Integrating, Failed)
                | (Integrating, Canceled)
                // A failed work order is retriable: `POST .../runs` on a
                // `failed` work order starts a fresh run rather than being
                // permanently stuck (§6). This is the one deliberate
                // exception to "terminal states never transition out" (§3) —
                // `succeeded` and `canceled` remain fully terminal.
                | (Failed, Queued)
        )
    }

    /// Applies the transition, returning the new state, or an error
    /// naming both sides of the illegal jump.
    pub fn transition(&mut self, to: WorkOrderStatus) -> crate::Result<WorkOrderStatus> {
        if self.current == to {
            return Ok(self.current);
        }

        if !Self::can_transition(self.current, to) {
            return Err(CoreError::IllegalTransition {
                from: format!("{:?}", self.current),
                to: format!("{:?}", to),
            });
        }

        self.current = to;
        Ok(self.current)
    }
}

/// Validates and applies transitions between [`RunState`] values. One notch
/// finer-grained than [`StateMachine`] since a run passes through build/
/// snapshot/verify sub-states on every iteration (§3).
#[derive(Debug, Clone, Copy)]
pub struct RunStateMachine {
    current: RunState,
}

impl RunStateMachine {
    pub fn new(initial: RunState) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> RunState {
        self.current
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn can_transition(from: RunState, to: RunState) -> bool {
        use RunState::*;
        if from.is_terminal() {
            return false;
        }
        matches!(
            (from, to),
            (Queued, Leased)
                | (Leased, Building)
                | (Building, Snapshotting)
                | (Snapshotting, Verifying)
                | (Verifying, Feedback)
                | (Verifying, PrCreated)
                | (Verifying, Succeeded)
                | (Verifying, Failed)
                | (Feedback, Building)
                | (PrCreated, CiPolling)
                | (CiPolling, Succeeded)
                | (CiPolling, Failed)
                | (CiPolling, Feedback)
        ) || matches!(to, Canceled)
    }

    pub fn transition(&mut self, to: RunState) -> crate::Result<RunState> {
        if self.current == to {
            return Ok(self.current);
        }

        if !Self::can_transition(self.current, to) {
            return Err(CoreError::IllegalTransition {
                from: format!("{:?}", self.current),
                to: format!("{:?}", to),
            });
        }

        self.current = to;
        Ok(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkOrderStatus::*;

    #[test]
    fn queued_to_running_is_legal() {
        let mut sm = StateMachine::new(Queued);
        assert_eq!(sm.transition(Running).unwrap(), Running);
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut sm = StateMachine::new(Succeeded);
        assert!(sm.transition(Running).is_err());
    }

    #[test]
    fn same_state_transition_is_a_noop() {
        let mut sm = StateMachine::new(Running);
        assert_eq!(sm.transition(Running).unwrap(), Running);
    }

    #[test]
    fn running_can_reach_any_terminal_state() {
        for terminal in [Succeeded, Failed, Canceled] {
            let mut sm = StateMachine::new(Running);
            assert!(sm.transition(terminal).is_ok());
        }
    }

    #[test]
    fn queued_cannot_skip_straight_to_succeeded() {
        let mut sm = StateMachine::new(Queued);
        assert!(sm.transition(Succeeded).is_err());
    }

    #[test]
    fn failed_work_order_can_be_requeued_for_a_retry_run() {
        let mut sm = StateMachine::new(Failed);
        assert_eq!(sm.transition(Queued).unwrap(), Queued);
    }

    #[test]
    fn succeeded_and_canceled_reject_requeue() {
        for terminal in [Succeeded, Canceled] {
            let mut sm = StateMachine::new(terminal);
            assert!(sm.transition(Queued).is_err());
        }
    }

    #[test]
    fn waiting_for_children_returns_to_running() {
        let mut sm = StateMachine::new(Running);
        sm.transition(WaitingForChildren).unwrap();
        assert_eq!(sm.transition(Running).unwrap(), Running);
    }

    #[test]
    fn run_cancellation_is_legal_from_any_non_terminal_state() {
        for state in [
            RunState::Queued,
            RunState::Leased,
            RunState::Building,
            RunState::Snapshotting,
            RunState::Verifying,
            RunState::Feedback,
            RunState::PrCreated,
            RunState::CiPolling,
        ] {
            let mut sm = RunStateMachine::new(state);
            assert!(sm.transition(RunState::Canceled).is_ok());
        }
    }

    #[test]
    fn run_cannot_transition_out_of_terminal_state() {
        let mut sm = RunStateMachine::new(RunState::Succeeded);
        assert!(sm.transition(RunState::Building).is_err());
    }

    #[test]
    fn run_feedback_loops_back_to_building() {
        let mut sm = RunStateMachine::new(RunState::Verifying);
        sm.transition(RunState::Feedback).unwrap();
        assert_eq!(sm.transition(RunState::Building).unwrap(), RunState::Building);
    }

    #[test]
    fn run_cannot_skip_building_straight_to_verifying() {
        let mut sm = RunStateMachine::new(RunState::Queued);
        assert!(sm.transition(RunState::Verifying).is_err());
    }
}

//! A request awaiting its response

use super::timer::TimerHandle;
use super::{Phase, StateTransition};

/// Identifies one issued request so stale deadlines can be told apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Resolved { success: bool },
    TimedOut,
    Cancelled,
}

/// Exactly one of response, deadline or cancellation settles it
#[derive(Debug)]
pub struct PendingRequest {
    id: RequestId,
    phase: Phase,
    packet_id: u32,
    entry: StateTransition,
    outcome: Outcome,
    deadline: TimerHandle,
}

impl PendingRequest {
    pub fn new(
        id: RequestId,
        phase: Phase,
        packet_id: u32,
        entry: StateTransition,
        deadline: TimerHandle,
    ) -> Self {
        Self {
            id,
            phase,
            packet_id,
            entry,
            outcome: Outcome::Pending,
            deadline,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn packet_id(&self) -> u32 {
        self.packet_id
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_pending(&self) -> bool {
        self.outcome == Outcome::Pending
    }

    /// Transition to take on a successful response
    pub fn completion(&self) -> StateTransition {
        self.phase.completion(&self.entry)
    }

    /// Record the outcome; false if already settled
    ///
    /// Settling by anything other than the deadline disarms the deadline.
    pub fn settle(&mut self, outcome: Outcome) -> bool {
        if !self.is_pending() || outcome == Outcome::Pending {
            return false;
        }
        self.outcome = outcome;
        if outcome != Outcome::TimedOut {
            self.deadline.cancel();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::timer::TimerService;
    use crate::session::LifecycleState;
    use std::time::Duration;

    fn pending() -> PendingRequest {
        let deadline = TimerService::new().schedule(Duration::from_secs(3), || {});
        PendingRequest::new(
            RequestId(1),
            Phase::Start,
            9,
            Phase::Start.entry(LifecycleState::StartInput),
            deadline,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_once() {
        let mut request = pending();
        assert!(request.settle(Outcome::Resolved { success: true }));
        assert!(!request.settle(Outcome::TimedOut));
        assert!(!request.settle(Outcome::Cancelled));
        assert_eq!(request.outcome(), Outcome::Resolved { success: true });
        assert!(!request.deadline.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_follows_entry() {
        let request = pending();
        let completion = request.completion();
        assert_eq!(completion.from, LifecycleState::StartWaiting);
        assert_eq!(completion.to, LifecycleState::StopInput);
        assert_eq!(completion.success_message, "Drone is now starting.");
    }
}

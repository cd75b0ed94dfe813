//! Per-agent lifecycle gate.
//!
//! ```text
//! Idle ──→ Planning ──→ Executing ──→ Idle
//!             │             │
//!             └──→ Idle     └──→ Error ──→ Idle
//! ```
//!
//! State lives in an atomic so that two concurrent callers racing for the
//! same transition cannot both succeed.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tender_core::{AgentError, AgentId, AgentState};

/// A transition that was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub agent_id: AgentId,
    pub from: AgentState,
    pub to: AgentState,
    pub reason: String,
}

/// Observer of agent state changes.
pub trait StateNotifier: Send + Sync {
    fn on_transition(&self, transition: &StateTransition);
}

fn encode(state: AgentState) -> u8 {
    match state {
        AgentState::Idle => 0,
        AgentState::Planning => 1,
        AgentState::Executing => 2,
        AgentState::Error => 3,
    }
}

fn decode(raw: u8) -> AgentState {
    match raw {
        1 => AgentState::Planning,
        2 => AgentState::Executing,
        3 => AgentState::Error,
        _ => AgentState::Idle,
    }
}

pub struct AgentStateMachine {
    agent_id: AgentId,
    state: AtomicU8,
    notifier: Option<Arc<dyn StateNotifier>>,
}

impl AgentStateMachine {
    /// Create a machine in `Idle`. Without a notifier transitions are only logged.
    pub fn new(agent_id: AgentId, notifier: Option<Arc<dyn StateNotifier>>) -> Self {
        Self {
            agent_id,
            state: AtomicU8::new(encode(AgentState::Idle)),
            notifier,
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn state(&self) -> AgentState {
        decode(self.state.load(Ordering::Acquire))
    }

    /// Only an idle agent may bid or receive an award.
    pub fn can_accept_work(&self) -> bool {
        self.state().can_accept_work()
    }

    /// Move from whatever the current state is to `to`.
    pub fn transition(&self, to: AgentState, reason: &str) -> Result<AgentState, AgentError> {
        self.transition_from(self.state(), to, reason)
    }

    /// Move from `expected` to `to` with a single compare-and-set.
    ///
    /// Fails without touching state when the transition is illegal or when
    /// another caller changed the state first.
    pub fn transition_from(
        &self,
        expected: AgentState,
        to: AgentState,
        reason: &str,
    ) -> Result<AgentState, AgentError> {
        if !expected.can_transition_to(to) {
            return Err(self.reject(expected, to, reason));
        }

        match self.state.compare_exchange(
            encode(expected),
            encode(to),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                tracing::debug!(
                    agent_id = %self.agent_id,
                    from = %expected,
                    to = %to,
                    reason,
                    "Agent state changed"
                );
                if let Some(notifier) = &self.notifier {
                    notifier.on_transition(&StateTransition {
                        agent_id: self.agent_id,
                        from: expected,
                        to,
                        reason: reason.to_string(),
                    });
                }
                Ok(expected)
            }
            Err(actual) => Err(self.reject(decode(actual), to, reason)),
        }
    }

    fn reject(&self, from: AgentState, to: AgentState, reason: &str) -> AgentError {
        tracing::warn!(
            agent_id = %self.agent_id,
            from = %from,
            to = %to,
            reason,
            "Rejected invalid agent state transition"
        );
        AgentError::InvalidTransition {
            agent_id: self.agent_id,
            from,
            to,
        }
    }
}

impl fmt::Debug for AgentStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentStateMachine")
            .field("agent_id", &self.agent_id)
            .field("state", &self.state())
            .field("has_notifier", &self.notifier.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tender_core::{new_entity_id, TenderResult};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<StateTransition>>,
    }

    impl StateNotifier for Recorder {
        fn on_transition(&self, transition: &StateTransition) {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(transition.clone());
            }
        }
    }

    #[test]
    fn test_full_success_cycle() -> TenderResult<()> {
        let machine = AgentStateMachine::new(new_entity_id(), None);
        assert!(machine.can_accept_work());
        machine.transition(AgentState::Planning, "award")?;
        machine.transition(AgentState::Executing, "accepted")?;
        machine.transition(AgentState::Idle, "done")?;
        assert_eq!(machine.state(), AgentState::Idle);
        Ok(())
    }

    #[test]
    fn test_failure_cycle_returns_to_idle() -> TenderResult<()> {
        let machine = AgentStateMachine::new(new_entity_id(), None);
        machine.transition(AgentState::Planning, "award")?;
        machine.transition(AgentState::Executing, "accepted")?;
        machine.transition(AgentState::Error, "failed")?;
        assert!(!machine.can_accept_work());
        machine.transition(AgentState::Idle, "acknowledged")?;
        assert!(machine.can_accept_work());
        Ok(())
    }

    #[test]
    fn test_invalid_transition_leaves_state_unchanged() {
        let machine = AgentStateMachine::new(new_entity_id(), None);
        let result = machine.transition(AgentState::Executing, "skip planning");
        assert!(matches!(
            result,
            Err(AgentError::InvalidTransition {
                from: AgentState::Idle,
                to: AgentState::Executing,
                ..
            })
        ));
        assert_eq!(machine.state(), AgentState::Idle);
    }

    #[test]
    fn test_stale_expected_state_loses() -> TenderResult<()> {
        let machine = AgentStateMachine::new(new_entity_id(), None);
        machine.transition(AgentState::Planning, "award")?;
        let second = machine.transition_from(AgentState::Idle, AgentState::Planning, "award");
        assert!(second.is_err());
        assert_eq!(machine.state(), AgentState::Planning);
        Ok(())
    }

    #[test]
    fn test_notifier_sees_applied_transitions_only() -> TenderResult<()> {
        let recorder = Arc::new(Recorder::default());
        let machine = AgentStateMachine::new(new_entity_id(), Some(recorder.clone()));
        machine.transition(AgentState::Planning, "award")?;
        let _ = machine.transition(AgentState::Error, "bogus");

        let seen = recorder.seen.lock().map_err(|_| tender_core::TenderError::lock_poisoned("recorder"))?;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].to, AgentState::Planning);
        assert_eq!(seen[0].reason, "award");
        Ok(())
    }

    #[test]
    fn test_concurrent_award_has_single_winner() {
        let machine = Arc::new(AgentStateMachine::new(new_entity_id(), None));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let machine = Arc::clone(&machine);
                std::thread::spawn(move || {
                    machine
                        .transition_from(AgentState::Idle, AgentState::Planning, "award")
                        .is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap_or(false))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}

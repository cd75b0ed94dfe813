//! Registry of known agents.
//!
//! Each entry owns the agent's state machine and its single assignment
//! binding. Binding happens under the entry's shard lock, so "idle and
//! unbound" is checked and claimed in one step.

use crate::capability::{CapabilityModel, CapabilityProfile, MAX_EFFICIENCY};
use crate::state_machine::{AgentStateMachine, StateNotifier};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tender_core::{
    to_time_delta, ActionType, AgentError, AgentId, AgentRole, AgentState, Announcement,
    AssignmentId, BidRequest, Timestamp,
};

/// Registration data for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub role: AgentRole,
    pub profile: CapabilityProfile,
    pub registered_at: Timestamp,
    pub last_heartbeat: Timestamp,
    /// Registration order, used by the round-robin fallback
    pub registration_seq: u64,
}

impl AgentRecord {
    pub fn can_perform(&self, action: ActionType) -> bool {
        CapabilityModel::can_perform(self.role, action)
    }

    pub fn efficiency(&self, action: ActionType) -> f64 {
        self.profile.efficiency(self.role, action)
    }

    /// Build this agent's bid for an announcement, or `None` when its role
    /// cannot perform every required action.
    ///
    /// The capability score is the weakest profile efficiency over the
    /// required actions, normalised by [`MAX_EFFICIENCY`].
    pub fn bid_for(
        &self,
        announcement: &Announcement,
        estimated_time: f64,
        confidence: f64,
    ) -> Option<BidRequest> {
        let required = &announcement.required_capabilities;
        if !CapabilityModel::can_perform_all(self.role, required) {
            return None;
        }
        let weakest = required
            .iter()
            .map(|a| self.efficiency(*a))
            .fold(MAX_EFFICIENCY, f64::min);
        Some(BidRequest::new(
            self.agent_id,
            announcement.announcement_id,
            (weakest / MAX_EFFICIENCY).clamp(0.0, 1.0),
            estimated_time,
            confidence,
        ))
    }

    /// Whether the agent has been silent for at least `timeout` at `now`.
    pub fn is_stale(&self, now: Timestamp, timeout: std::time::Duration) -> bool {
        now - self.last_heartbeat >= to_time_delta(timeout)
    }
}

/// Point-in-time view of an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSnapshot {
    pub record: AgentRecord,
    pub state: AgentState,
    pub current_assignment: Option<AssignmentId>,
}

impl AgentSnapshot {
    pub fn agent_id(&self) -> AgentId {
        self.record.agent_id
    }

    /// Idle, unbound and able to perform every required action.
    pub fn is_eligible_for<'a, I>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = &'a ActionType>,
    {
        self.state == AgentState::Idle
            && self.current_assignment.is_none()
            && CapabilityModel::can_perform_all(self.record.role, required)
    }
}

#[derive(Debug)]
struct AgentEntry {
    record: AgentRecord,
    machine: Arc<AgentStateMachine>,
    current_assignment: Option<AssignmentId>,
}

impl AgentEntry {
    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            record: self.record.clone(),
            state: self.machine.state(),
            current_assignment: self.current_assignment,
        }
    }
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<AgentId, AgentEntry>,
    next_seq: AtomicU64,
    notifier: Option<Arc<dyn StateNotifier>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a notifier handed to every state machine created afterwards.
    pub fn with_notifier(mut self, notifier: Arc<dyn StateNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn register(
        &self,
        agent_id: AgentId,
        role: AgentRole,
        profile: CapabilityProfile,
        now: Timestamp,
    ) -> Result<AgentSnapshot, AgentError> {
        match self.agents.entry(agent_id) {
            Entry::Occupied(_) => Err(AgentError::AlreadyRegistered { agent_id }),
            Entry::Vacant(vacant) => {
                let entry = AgentEntry {
                    record: AgentRecord {
                        agent_id,
                        role,
                        profile,
                        registered_at: now,
                        last_heartbeat: now,
                        registration_seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                    },
                    machine: Arc::new(AgentStateMachine::new(agent_id, self.notifier.clone())),
                    current_assignment: None,
                };
                let snapshot = entry.snapshot();
                vacant.insert(entry);
                tracing::info!(agent_id = %agent_id, role = %role, "Agent registered");
                Ok(snapshot)
            }
        }
    }

    /// Remove an agent, returning its last snapshot so the caller can
    /// recover any in-flight assignment.
    pub fn deregister(&self, agent_id: AgentId) -> Result<AgentSnapshot, AgentError> {
        let (_, entry) = self
            .agents
            .remove(&agent_id)
            .ok_or(AgentError::NotRegistered { agent_id })?;
        tracing::info!(
            agent_id = %agent_id,
            in_flight = ?entry.current_assignment,
            "Agent deregistered"
        );
        Ok(entry.snapshot())
    }

    pub fn heartbeat(&self, agent_id: AgentId, now: Timestamp) -> Result<(), AgentError> {
        let mut entry = self
            .agents
            .get_mut(&agent_id)
            .ok_or(AgentError::NotRegistered { agent_id })?;
        if now > entry.record.last_heartbeat {
            entry.record.last_heartbeat = now;
        }
        Ok(())
    }

    pub fn contains(&self, agent_id: AgentId) -> bool {
        self.agents.contains_key(&agent_id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn get(&self, agent_id: AgentId) -> Option<AgentSnapshot> {
        self.agents.get(&agent_id).map(|e| e.snapshot())
    }

    pub fn state(&self, agent_id: AgentId) -> Option<AgentState> {
        self.agents.get(&agent_id).map(|e| e.machine.state())
    }

    pub fn state_machine(&self, agent_id: AgentId) -> Option<Arc<AgentStateMachine>> {
        self.agents.get(&agent_id).map(|e| Arc::clone(&e.machine))
    }

    pub fn current_assignment(&self, agent_id: AgentId) -> Option<AssignmentId> {
        self.agents.get(&agent_id).and_then(|e| e.current_assignment)
    }

    /// All agents in registration order.
    pub fn snapshots_in_order(&self) -> Vec<AgentSnapshot> {
        let mut all: Vec<AgentSnapshot> = self.agents.iter().map(|e| e.snapshot()).collect();
        all.sort_by_key(|s| s.record.registration_seq);
        all
    }

    /// Agents that could take a task needing `required` right now, in
    /// registration order.
    pub fn eligible_in_order(&self, required: &[ActionType]) -> Vec<AgentSnapshot> {
        self.snapshots_in_order()
            .into_iter()
            .filter(|s| s.is_eligible_for(required))
            .collect()
    }

    /// Claim an idle, unbound agent for `assignment_id`.
    ///
    /// Moves the agent `Idle → Planning` and records the binding atomically.
    /// A second claim on the same agent fails with `AlreadyBound` or
    /// `InvalidTransition` and leaves the first claim intact.
    pub fn reserve(&self, agent_id: AgentId, assignment_id: AssignmentId) -> Result<(), AgentError> {
        let mut entry = self
            .agents
            .get_mut(&agent_id)
            .ok_or(AgentError::NotRegistered { agent_id })?;

        if let Some(existing) = entry.current_assignment {
            tracing::error!(
                agent_id = %agent_id,
                existing = %existing,
                attempted = %assignment_id,
                "Double assignment attempt rejected by registry"
            );
            return Err(AgentError::AlreadyBound {
                agent_id,
                assignment_id: existing,
            });
        }

        entry
            .machine
            .transition_from(AgentState::Idle, AgentState::Planning, "award received")?;
        entry.current_assignment = Some(assignment_id);
        Ok(())
    }

    /// Drop the binding if it still points at `assignment_id`.
    pub fn release(&self, agent_id: AgentId, assignment_id: AssignmentId) -> bool {
        match self.agents.get_mut(&agent_id) {
            Some(mut entry) if entry.current_assignment == Some(assignment_id) => {
                entry.current_assignment = None;
                true
            }
            _ => false,
        }
    }

    /// Agents whose last heartbeat is at least `timeout` old.
    pub fn stale_agents(&self, now: Timestamp, timeout: std::time::Duration) -> Vec<AgentId> {
        self.agents
            .iter()
            .filter(|e| e.record.is_stale(now, timeout))
            .map(|e| e.record.agent_id)
            .collect()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.len())
            .field("has_notifier", &self.notifier.is_some())
            .finish()
    }
}

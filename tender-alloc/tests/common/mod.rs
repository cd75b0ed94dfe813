#![allow(dead_code)]

use std::sync::Arc;
use tender_alloc::PlanCoordinator;
use tender_core::{
    new_entity_id, AgentError, AgentId, AgentRole, AllocationConfig, Announcement,
    AnnouncementId, Assignment, AssignmentError, Bid, BidError, EventSink, PlanId, Task, TaskId,
    TenderResult, Timestamp,
};
use tender_test_utils::{fixtures, CapabilityProfile, RecordingSink};

pub struct Harness {
    pub coordinator: PlanCoordinator,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new(config: AllocationConfig) -> TenderResult<Self> {
        let sink = Arc::new(RecordingSink::new());
        let events: Arc<dyn EventSink> = Arc::clone(&sink) as Arc<dyn EventSink>;
        let coordinator = PlanCoordinator::new(config, events)?;
        Ok(Self { coordinator, sink })
    }

    pub fn scenario() -> TenderResult<Self> {
        Self::new(fixtures::scenario_config())
    }

    pub fn agent(&self, role: AgentRole) -> TenderResult<AgentId> {
        self.agent_at(role, fixtures::t0())
    }

    pub fn agent_at(&self, role: AgentRole, now: Timestamp) -> TenderResult<AgentId> {
        self.agent_with_profile(role, CapabilityProfile::for_role(role), now)
    }

    pub fn agent_with_profile(
        &self,
        role: AgentRole,
        profile: CapabilityProfile,
        now: Timestamp,
    ) -> TenderResult<AgentId> {
        let id = new_entity_id();
        self.coordinator.register_agent(id, role, profile, now)?;
        Ok(id)
    }

    /// Bid the way a worker would: capability comes from the agent's own
    /// registered profile.
    pub fn bid(
        &self,
        agent_id: AgentId,
        announcement_id: AnnouncementId,
        estimated_time: f64,
        confidence: f64,
        now: Timestamp,
    ) -> TenderResult<Bid> {
        let record = self
            .coordinator
            .registry()
            .get(agent_id)
            .ok_or(AgentError::NotRegistered { agent_id })?
            .record;
        let announcement = self
            .coordinator
            .engine()
            .announcement(announcement_id)
            .ok_or(BidError::AnnouncementNotFound { announcement_id })?;
        let request = record
            .bid_for(&announcement, estimated_time, confidence)
            .ok_or(BidError::AgentNotCapable {
                agent_id,
                action: announcement.action,
            })?;
        self.coordinator.submit_bid(request, now)
    }

    pub fn plan(&self, tasks: Vec<Task>) -> TenderResult<PlanId> {
        let plan_id = new_entity_id();
        self.coordinator
            .submit_plan(plan_id, tasks, None, fixtures::t0())?;
        Ok(plan_id)
    }

    /// The most recent announcement for a task.
    pub fn current_announcement(&self, task_id: TaskId) -> Option<Announcement> {
        self.coordinator
            .engine()
            .announcements_for_task(task_id)
            .into_iter()
            .last()
    }

    /// The task's non-terminal assignment.
    pub fn active_assignment(&self, task_id: TaskId) -> TenderResult<Assignment> {
        self.coordinator
            .tracker()
            .task(task_id)
            .and_then(|v| v.active_assignment)
            .and_then(|id| self.coordinator.tracker().assignment(id))
            .ok_or_else(|| AssignmentError::TaskNotFound { task_id }.into())
    }
}

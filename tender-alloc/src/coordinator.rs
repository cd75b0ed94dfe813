//! Plan coordination façade.
//!
//! [`PlanCoordinator`] is the entry point callers talk to: it accepts plans,
//! registers agents and routes inbound protocol messages to the
//! [`ContractNetEngine`].

use crate::contract_net::{ContractNetEngine, TickReport};
use crate::metrics::AllocationMetrics;
use crate::tracker::TaskAssignmentTracker;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tender_agents::{AgentRegistry, AgentSnapshot, CapabilityProfile};
use tender_core::{
    keys, AgentId, AgentMessage, AgentRole, AllocationConfig, AssignmentError, AssignmentId,
    Assignment, Bid, BidRequest, EventSink, MessageType, Plan, PlanId, PlanStatus, Task,
    TenderError, TenderResult, Timestamp, ValidationError,
};

/// What an inbound message turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    BidRecorded(Bid),
    AssignmentUpdated(Assignment),
}

pub struct PlanCoordinator {
    engine: Arc<ContractNetEngine>,
    registry: Arc<AgentRegistry>,
    tracker: Arc<TaskAssignmentTracker>,
}

impl PlanCoordinator {
    /// Build a coordinator with a fresh registry and tracker.
    pub fn new(config: AllocationConfig, sink: Arc<dyn EventSink>) -> TenderResult<Self> {
        Self::with_registry(config, Arc::new(AgentRegistry::new()), sink)
    }

    pub fn with_registry(
        config: AllocationConfig,
        registry: Arc<AgentRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> TenderResult<Self> {
        let tracker = Arc::new(TaskAssignmentTracker::new());
        let engine = ContractNetEngine::new(
            config,
            Arc::clone(&registry),
            Arc::clone(&tracker),
            sink,
        )?;
        Ok(Self {
            engine: Arc::new(engine),
            registry,
            tracker,
        })
    }

    pub fn engine(&self) -> &ContractNetEngine {
        &self.engine
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &TaskAssignmentTracker {
        &self.tracker
    }

    pub fn metrics(&self) -> Arc<AllocationMetrics> {
        self.engine.metrics()
    }

    // ------------------------------------------------------------------------
    // Plans
    // ------------------------------------------------------------------------

    /// Accept a plan and announce every task.
    ///
    /// The whole plan is validated before anything is registered; one bad
    /// task rejects the plan.
    pub fn submit_plan(
        &self,
        plan_id: PlanId,
        tasks: Vec<Task>,
        request_ref: Option<String>,
        now: Timestamp,
    ) -> TenderResult<Plan> {
        if tasks.is_empty() {
            return Err(ValidationError::EmptyPlan { plan_id }.into());
        }
        if self.tracker.plan(plan_id).is_some() {
            return Err(AssignmentError::DuplicatePlan { plan_id }.into());
        }

        let mut seen = HashSet::new();
        let mut validated: Vec<(Task, BTreeSet<_>)> = Vec::with_capacity(tasks.len());
        for task in tasks {
            let task_id = task.task_id;
            if !seen.insert(task_id) || self.tracker.contains_task(task_id) {
                return Err(ValidationError::DuplicateTask { task_id }.into());
            }
            let required = task.required_capabilities().map_err(|e| {
                tracing::warn!(plan_id = %plan_id, task_id = %task_id, error = %e, "Plan rejected");
                e
            })?;
            validated.push((task, required));
        }

        let plan = Plan {
            plan_id,
            task_ids: validated.iter().map(|(t, _)| t.task_id).collect(),
            request_ref,
            submitted_at: now,
        };
        self.tracker.register_plan(plan.clone(), validated)?;
        tracing::info!(plan_id = %plan_id, tasks = plan.task_ids.len(), "Plan submitted");

        for task_id in &plan.task_ids {
            if let Err(e) = self.engine.announce(*task_id, now) {
                tracing::warn!(plan_id = %plan_id, task_id = %task_id, error = %e, "Announcement failed");
            }
        }
        Ok(plan)
    }

    pub fn cancel(&self, plan_id: PlanId, now: Timestamp) -> TenderResult<bool> {
        self.engine.cancel_plan(plan_id, now)
    }

    pub fn plan_status(&self, plan_id: PlanId) -> TenderResult<PlanStatus> {
        self.tracker.plan_status(plan_id)
    }

    pub fn plan_progress(&self, plan_id: PlanId) -> TenderResult<f64> {
        self.tracker.plan_progress(plan_id)
    }

    // ------------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------------

    pub fn register_agent(
        &self,
        agent_id: AgentId,
        role: AgentRole,
        profile: CapabilityProfile,
        now: Timestamp,
    ) -> TenderResult<AgentSnapshot> {
        Ok(self.registry.register(agent_id, role, profile, now)?)
    }

    pub fn heartbeat(&self, agent_id: AgentId, now: Timestamp) -> TenderResult<()> {
        Ok(self.registry.heartbeat(agent_id, now)?)
    }

    /// Remove an agent; its in-flight work is retried elsewhere.
    pub fn deregister_agent(&self, agent_id: AgentId, now: Timestamp) -> TenderResult<()> {
        tracing::info!(agent_id = %agent_id, "Agent deregistering");
        self.engine.remove_agent(agent_id, now)
    }

    // ------------------------------------------------------------------------
    // Protocol
    // ------------------------------------------------------------------------

    pub fn submit_bid(&self, request: BidRequest, now: Timestamp) -> TenderResult<Bid> {
        self.engine.submit_bid(request, now)
    }

    pub fn accept_award(
        &self,
        agent_id: AgentId,
        assignment_id: AssignmentId,
        now: Timestamp,
    ) -> TenderResult<Assignment> {
        self.engine.accept_award(agent_id, assignment_id, now)
    }

    pub fn decline_award(
        &self,
        agent_id: AgentId,
        assignment_id: AssignmentId,
        now: Timestamp,
    ) -> TenderResult<Assignment> {
        self.engine.decline_award(agent_id, assignment_id, now)
    }

    pub fn report_progress(
        &self,
        assignment_id: AssignmentId,
        percent: u8,
        now: Timestamp,
    ) -> TenderResult<Assignment> {
        self.engine.report_progress(assignment_id, percent, now)
    }

    pub fn report_completion(
        &self,
        assignment_id: AssignmentId,
        success: bool,
        detail: Option<String>,
        now: Timestamp,
    ) -> TenderResult<Assignment> {
        self.engine
            .report_completion(assignment_id, success, detail, now)
    }

    /// Route an inbound agent message.
    pub fn handle_message(&self, message: &AgentMessage, now: Timestamp) -> TenderResult<MessageOutcome> {
        let sender = message.sender_id;
        tracing::debug!(
            message_id = %message.message_id,
            message_type = %message.message_type,
            sender = %sender,
            "Inbound message"
        );

        match message.message_type {
            MessageType::Bid => {
                let mut request = BidRequest::new(
                    sender,
                    message.payload_uuid(keys::ANNOUNCEMENT_ID)?,
                    message.payload_f64(keys::CAPABILITY_SCORE)?,
                    message.payload_f64(keys::ESTIMATED_TIME)?,
                    message.payload_f64(keys::CONFIDENCE)?,
                );
                request.distance = message.payload_optional_f64(keys::DISTANCE)?;
                self.submit_bid(request, now).map(MessageOutcome::BidRecorded)
            }
            MessageType::Accept => {
                let assignment_id = message.payload_uuid(keys::ASSIGNMENT_ID)?;
                self.accept_award(sender, assignment_id, now)
                    .map(MessageOutcome::AssignmentUpdated)
            }
            MessageType::Reject => {
                let assignment_id = message.payload_uuid(keys::ASSIGNMENT_ID)?;
                self.decline_award(sender, assignment_id, now)
                    .map(MessageOutcome::AssignmentUpdated)
            }
            MessageType::Progress => {
                let assignment_id = self.owned_by(message)?;
                let percent = message.payload_percent(keys::PERCENT)?;
                self.report_progress(assignment_id, percent, now)
                    .map(MessageOutcome::AssignmentUpdated)
            }
            MessageType::Complete | MessageType::Fail => {
                let assignment_id = self.owned_by(message)?;
                let detail = message.payload.get(keys::DETAIL).cloned();
                let success = message.message_type == MessageType::Complete;
                self.report_completion(assignment_id, success, detail, now)
                    .map(MessageOutcome::AssignmentUpdated)
            }
            MessageType::Announce | MessageType::Award => Err(TenderError::InvalidMessage {
                message_type: message.message_type.to_string(),
                reason: "outbound-only message type".to_string(),
            }),
        }
    }

    fn owned_by(&self, message: &AgentMessage) -> TenderResult<AssignmentId> {
        let assignment_id = message.payload_uuid(keys::ASSIGNMENT_ID)?;
        let assignment = self
            .tracker
            .assignment(assignment_id)
            .ok_or(AssignmentError::NotFound { assignment_id })?;
        if assignment.agent_id != message.sender_id {
            return Err(AssignmentError::WrongAgent {
                assignment_id,
                agent_id: message.sender_id,
            }
            .into());
        }
        Ok(assignment_id)
    }

    // ------------------------------------------------------------------------
    // Time
    // ------------------------------------------------------------------------

    pub fn tick(&self, now: Timestamp) -> TenderResult<TickReport> {
        self.engine.tick(now)
    }
}

impl std::fmt::Debug for PlanCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCoordinator")
            .field("engine", &self.engine)
            .field("agents", &self.registry.len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
